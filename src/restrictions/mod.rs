//! Restriction evaluator (spec §4.E): admission checks applied before a
//! file is allowed into the session, plus the batch-level minimum-count
//! check applied only at `upload()` time.

mod error;

pub use self::error::{Error, ErrorKind, Result};

use crate::config::RestrictionsConfig;
use crate::types::{FileRecord, SessionState};

/// Checks a single candidate file against the configured policy
/// (spec §4.E, "per-file checks"). Does not check file count: that is a
/// property of the whole batch and is evaluated separately.
pub fn check_file(config: &RestrictionsConfig, file: &FileRecord) -> Result<()> {
    if let Some(max_size) = config.max_file_size() {
        if let Some(size) = file.size {
            if size > max_size {
                return Err(ErrorKind::FileTooLarge {
                    name: file.name.clone(),
                    size,
                    max_size,
                }
                .into());
            }
        }
    }

    if let Some(allowed) = config.allowed_file_types() {
        if !allowed.is_empty() && !matches_any_allowed_type(file, &allowed) {
            return Err(ErrorKind::DisallowedFileType {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            }
            .into());
        }
    }

    for field in config.required_meta_fields() {
        if !file.meta.contains_key(&field) {
            return Err(ErrorKind::MissingRequiredMeta {
                name: file.name.clone(),
                field,
            }
            .into());
        }
    }

    Ok(())
}

/// Checks that adding `candidate` would not push the session over the
/// configured file-count or total-size ceilings (spec §4.E,
/// `maxNumberOfFiles`/`maxTotalFileSize`).
pub fn check_session_capacity(
    config: &RestrictionsConfig,
    state: &SessionState,
    candidate: &FileRecord,
) -> Result<()> {
    if let Some(max_count) = config.max_number_of_files() {
        if state.files.len() >= max_count {
            return Err(ErrorKind::TooManyFiles { max_count }.into());
        }
    }

    if let Some(max_total) = config.max_total_file_size() {
        let current_total: u64 = state.files.values().filter_map(|f| f.size).sum();
        let candidate_size = candidate.size.unwrap_or(0);
        if current_total + candidate_size > max_total {
            return Err(ErrorKind::TotalSizeExceeded { max_total }.into());
        }
    }

    Ok(())
}

/// Checked only when `upload()` is called, never when a file is added
/// (spec §4.E, "minNumberOfFiles is enforced at upload time").
pub fn check_minimum_files(config: &RestrictionsConfig, state: &SessionState) -> Result<()> {
    if let Some(min_count) = config.min_number_of_files() {
        if state.files.len() < min_count {
            return Err(ErrorKind::NotEnoughFiles {
                min_count,
                actual: state.files.len(),
            }
            .into());
        }
    }
    Ok(())
}

fn matches_any_allowed_type(file: &FileRecord, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| matches_type_pattern(file, pattern))
}

/// A pattern is either a `.extension` suffix, a `type/*` MIME prefix
/// matching any subtype, or a segment pattern matched against the MIME
/// type split on `/`, `+`, `.` (spec §4.E, `allowedFileTypes` pattern
/// rules) -- the last form is what lets `application/*+json` match
/// `application/ld+json`.
fn matches_type_pattern(file: &FileRecord, pattern: &str) -> bool {
    if let Some(extension) = pattern.strip_prefix('.') {
        return file
            .extension
            .as_deref()
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return file
            .mime_type
            .split('/')
            .next()
            .map(|p| p.eq_ignore_ascii_case(prefix))
            .unwrap_or(false);
    }
    matches_mime_segments(&file.mime_type, pattern)
}

/// Splits on `/`, `+`, `.`, keeping the delimiters themselves as tokens, so
/// a pattern and a candidate line up segment for segment; a bare `*`
/// segment matches anything in that position.
fn mime_tokens(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '/' || c == '+' || c == '.' {
            if start < i {
                tokens.push(&s[start..i]);
            }
            tokens.push(&s[i..i + c.len_utf8()]);
            start = i + c.len_utf8();
        }
    }
    if start < s.len() {
        tokens.push(&s[start..]);
    }
    tokens
}

fn matches_mime_segments(mime_type: &str, pattern: &str) -> bool {
    let pattern_tokens = mime_tokens(pattern);
    let mime_tokens = mime_tokens(mime_type);
    pattern_tokens.len() == mime_tokens.len()
        && pattern_tokens
            .iter()
            .zip(mime_tokens.iter())
            .all(|(p, m)| *p == "*" || p.eq_ignore_ascii_case(m))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::FileProgress;
    use std::collections::HashMap;

    fn file(name: &str, mime_type: &str, size: u64) -> FileRecord {
        FileRecord {
            id: name.into(),
            source: "local".into(),
            name: name.to_owned(),
            extension: name.rsplit('.').next().map(String::from),
            mime_type: mime_type.to_owned(),
            data: Default::default(),
            size: Some(size),
            meta: HashMap::new(),
            progress: FileProgress::default(),
            is_paused: false,
            error: None,
            response: None,
            upload_url: None,
            is_remote: false,
            remote: None,
        }
    }

    fn config_with(pairs: &[(&str, &str)]) -> RestrictionsConfig {
        let mut config = RestrictionsConfig::default();
        for (k, v) in pairs {
            config.insert(k.to_string(), v.to_string());
        }
        config
    }

    #[test]
    fn rejects_oversized_file() {
        let config = config_with(&[("max_file_size", "100")]);
        let f = file("big.png", "image/png", 200);
        assert!(check_file(&config, &f).is_err());
    }

    #[test]
    fn accepts_file_within_size_limit() {
        let config = config_with(&[("max_file_size", "100")]);
        let f = file("small.png", "image/png", 50);
        assert!(check_file(&config, &f).is_ok());
    }

    #[test]
    fn wildcard_mime_pattern_matches_prefix() {
        let config = config_with(&[("allowed_file_types", "image/*")]);
        assert!(check_file(&config, &file("a.png", "image/png", 1)).is_ok());
        assert!(check_file(&config, &file("a.pdf", "application/pdf", 1)).is_err());
    }

    #[test]
    fn extension_pattern_matches_suffix() {
        let config = config_with(&[("allowed_file_types", ".csv")]);
        assert!(check_file(&config, &file("data.csv", "text/csv", 1)).is_ok());
        assert!(check_file(&config, &file("data.tsv", "text/tab-separated-values", 1)).is_err());
    }

    #[test]
    fn plus_segment_wildcard_matches_structured_suffix() {
        let config = config_with(&[("allowed_file_types", "application/*+json")]);
        assert!(check_file(&config, &file("a.jsonld", "application/ld+json", 1)).is_ok());
        assert!(check_file(&config, &file("a.json", "application/json", 1)).is_err());
        assert!(check_file(&config, &file("a.xml", "application/xml", 1)).is_err());
    }

    #[test]
    fn minimum_file_count_only_checked_explicitly() {
        let config = config_with(&[("min_number_of_files", "2")]);
        let state = SessionState::default();
        assert!(check_minimum_files(&config, &state).is_err());
    }

    #[test]
    fn missing_required_meta_field_is_rejected() {
        let config = config_with(&[("required_meta_fields", "project_id")]);
        let f = file("a.png", "image/png", 1);
        assert!(check_file(&config, &f).is_err());
    }
}
