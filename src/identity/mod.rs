//! File identity and typing (spec §4.D): deriving a stable id, a display
//! name, an extension, and a MIME type for an acquired file.
//!
//! Grounded on the teacher's `cache::collector` hashing of on-disk blobs
//! into stable cache keys, generalized from "hash a file on disk" to "hash
//! whatever identifying bits we have" since files here may be in-memory
//! blobs from a remote provider rather than local paths.

use sha2::{Digest, Sha256};

/// The subset of identifying information the typing step needs: a source
/// tag, an optional declared name, an optional declared MIME type, an
/// optional last-modified timestamp (ms since epoch), and the bytes
/// themselves (only used for hashing, never copied).
pub struct Acquisition<'a> {
    pub source: &'a str,
    pub declared_name: Option<&'a str>,
    pub declared_mime_type: Option<&'a str>,
    pub last_modified: Option<i64>,
    pub data: &'a [u8],
}

/// Generates a stable file id from the determinism tuple
/// `{name, type, size, lastModified, source}` (spec §4.D's
/// `"uppy-<name>-<type>-<size>-<lastModified>"` formula, spec §8's
/// round-trip law), so the same file acquired twice in one session collides
/// predictably and a different MIME type or modification time never does
/// (spec §3 invariant 5, spec GLOSSARY "File ID").
pub fn generate_file_id(acquisition: &Acquisition) -> String {
    let mut hasher = Sha256::new();
    hasher.update(acquisition.source.as_bytes());
    if let Some(name) = acquisition.declared_name {
        hasher.update(name.as_bytes());
    }
    if let Some(mime_type) = acquisition.declared_mime_type {
        hasher.update(mime_type.as_bytes());
    }
    hasher.update(acquisition.data.len().to_le_bytes());
    if let Some(last_modified) = acquisition.last_modified {
        hasher.update(last_modified.to_le_bytes());
    }
    hasher.update(acquisition.data);
    format!("{:x}", hasher.finalize())
}

/// Splits a file name into `(name, extension)`, mirroring the rule that the
/// extension is whatever follows the last `.`, unless the name has no `.`
/// or starts with one (a dotfile has no extension) (spec §4.D).
pub fn split_name_and_extension(file_name: &str) -> (String, Option<String>) {
    match file_name.rfind('.') {
        Some(0) => (file_name.to_owned(), None),
        Some(idx) => (
            file_name[..idx].to_owned(),
            Some(file_name[idx + 1..].to_owned()),
        ),
        None => (file_name.to_owned(), None),
    }
}

/// Resolves a display name for a file, synthesizing one when the
/// acquisition source didn't provide one (spec §4.D, "image-like sources
/// without a name get a synthesized one").
pub fn resolve_file_name(acquisition: &Acquisition) -> String {
    if let Some(name) = acquisition.declared_name {
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    let extension = acquisition
        .declared_mime_type
        .and_then(extension_for_mime_type)
        .unwrap_or("bin");
    format!("{}-{}.{}", acquisition.source, &short_hash(acquisition.data), extension)
}

fn short_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())[..8].to_owned()
}

/// Infers a MIME type, preferring the acquisition's declared type, then the
/// file extension, then a generic binary fallback (spec §4.D, "typing
/// order").
pub fn infer_mime_type(acquisition: &Acquisition, extension: Option<&str>) -> String {
    if let Some(mime) = acquisition.declared_mime_type {
        if !mime.is_empty() {
            return mime.to_owned();
        }
    }
    extension
        .and_then(mime_type_for_extension)
        .unwrap_or("application/octet-stream")
        .to_owned()
}

fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    Some(match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "zip" => "application/zip",
        _ => return None,
    })
}

fn extension_for_mime_type(mime_type: &str) -> Option<&'static str> {
    Some(match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "application/zip" => "zip",
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_bytes_and_name_collide() {
        let a = Acquisition {
            source: "local",
            declared_name: Some("report.pdf"),
            declared_mime_type: None,
            last_modified: None,
            data: b"hello world",
        };
        let b = Acquisition {
            source: "local",
            declared_name: Some("report.pdf"),
            declared_mime_type: None,
            last_modified: None,
            data: b"hello world",
        };
        assert_eq!(generate_file_id(&a), generate_file_id(&b));
    }

    #[test]
    fn different_bytes_do_not_collide() {
        let a = Acquisition {
            source: "local",
            declared_name: Some("report.pdf"),
            declared_mime_type: None,
            last_modified: None,
            data: b"hello world",
        };
        let b = Acquisition {
            source: "local",
            declared_name: Some("report.pdf"),
            declared_mime_type: None,
            last_modified: None,
            data: b"goodbye world",
        };
        assert_ne!(generate_file_id(&a), generate_file_id(&b));
    }

    #[test]
    fn differing_mime_type_or_last_modified_does_not_collide() {
        let base = Acquisition {
            source: "local",
            declared_name: Some("report.pdf"),
            declared_mime_type: Some("application/pdf"),
            last_modified: Some(1_700_000_000_000),
            data: b"hello world",
        };
        let different_type = Acquisition {
            declared_mime_type: Some("application/octet-stream"),
            ..Acquisition {
                source: "local",
                declared_name: Some("report.pdf"),
                declared_mime_type: None,
                last_modified: Some(1_700_000_000_000),
                data: b"hello world",
            }
        };
        let different_last_modified = Acquisition {
            last_modified: Some(1_700_000_000_001),
            ..Acquisition {
                source: "local",
                declared_name: Some("report.pdf"),
                declared_mime_type: Some("application/pdf"),
                last_modified: None,
                data: b"hello world",
            }
        };
        assert_ne!(generate_file_id(&base), generate_file_id(&different_type));
        assert_ne!(generate_file_id(&base), generate_file_id(&different_last_modified));
    }

    #[test]
    fn splits_extension_from_name() {
        assert_eq!(
            split_name_and_extension("photo.png"),
            ("photo".to_owned(), Some("png".to_owned()))
        );
        assert_eq!(
            split_name_and_extension("README"),
            ("README".to_owned(), None)
        );
        assert_eq!(
            split_name_and_extension(".gitignore"),
            (".gitignore".to_owned(), None)
        );
    }

    #[test]
    fn synthesizes_a_name_when_none_is_declared() {
        let acquisition = Acquisition {
            source: "webcam",
            declared_name: None,
            declared_mime_type: Some("image/png"),
            last_modified: None,
            data: b"pixels",
        };
        let name = resolve_file_name(&acquisition);
        assert!(name.starts_with("webcam-"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn mime_type_prefers_declared_then_extension_then_fallback() {
        let declared = Acquisition {
            source: "local",
            declared_name: Some("x.png"),
            declared_mime_type: Some("application/custom"),
            last_modified: None,
            data: b"",
        };
        assert_eq!(infer_mime_type(&declared, Some("png")), "application/custom");

        let from_extension = Acquisition {
            source: "local",
            declared_name: Some("x.png"),
            declared_mime_type: None,
            last_modified: None,
            data: b"",
        };
        assert_eq!(infer_mime_type(&from_extension, Some("png")), "image/png");

        let fallback = Acquisition {
            source: "local",
            declared_name: Some("x.unknownext"),
            declared_mime_type: None,
            last_modified: None,
            data: b"",
        };
        assert_eq!(
            infer_mime_type(&fallback, Some("unknownext")),
            "application/octet-stream"
        );
    }
}
