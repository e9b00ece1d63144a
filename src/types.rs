//! The data model shared by every component: file records, batches, and the
//! single session state they live in. See spec §3.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable fingerprint of a file record, unique per session for the lifetime
/// of the record (spec §3 invariant 5).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FileId(pub String);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        FileId(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        FileId(s.to_owned())
    }
}

/// Collision-resistant identifier for an upload batch (spec GLOSSARY).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        BatchId(s)
    }
}

/// A remote-provider descriptor, present only on files acquired through a
/// remote provider (spec §3, `remote`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub provider: String,
    pub url: String,
    pub body: Value,
    pub provider_options: HashMap<String, Value>,
    pub companion_url: String,
    /// The companion's job token, once the upload has been submitted over
    /// HTTP (spec §4.J). `None` until `uploader-remote` completes its first
    /// POST; persisted afterward so a resumed batch reconnects to the same
    /// job instead of resubmitting it.
    pub token: Option<String>,
}

/// Per-file progress, mutable over the life of the record (spec §3,
/// `progress`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileProgress {
    pub percentage: u8,
    pub bytes_uploaded: u64,
    pub bytes_total: Option<u64>,
    pub upload_started: Option<DateTime<Utc>>,
    pub upload_complete: bool,
    pub preprocess: Option<Value>,
    pub postprocess: Option<Value>,
}

impl Default for FileProgress {
    fn default() -> Self {
        FileProgress {
            percentage: 0,
            bytes_uploaded: 0,
            bytes_total: None,
            upload_started: None,
            upload_complete: false,
            preprocess: None,
            postprocess: None,
        }
    }
}

/// The result of a successful (or partially successful) upload request,
/// attached to a file record once a response is received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: u16,
    pub body: Value,
}

/// Immutable identity plus mutable progress/error slots (spec §3, "File
/// record").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub source: String,
    pub name: String,
    pub extension: Option<String>,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(skip, default)]
    pub data: Bytes,
    pub size: Option<u64>,
    pub meta: HashMap<String, Value>,
    pub progress: FileProgress,
    pub is_paused: bool,
    pub error: Option<String>,
    pub response: Option<UploadResponse>,
    pub upload_url: Option<String>,
    pub is_remote: bool,
    pub remote: Option<RemoteDescriptor>,
}

impl FileRecord {
    /// A file is eligible for pause/resume only while it has not finished
    /// uploading (spec §3 invariant 4).
    pub fn is_pausable(&self) -> bool {
        !self.progress.upload_complete
    }

    /// A file is "in progress" once it has been handed to an uploader but
    /// has not yet reached a terminal state (spec §4.F).
    pub fn is_in_progress(&self) -> bool {
        self.progress.upload_started.is_some() && !self.progress.upload_complete
    }
}

/// Per-batch bookkeeping (spec §3, `currentUploads`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchState {
    pub file_ids: Vec<FileId>,
    pub step: usize,
    pub result: Option<BatchResult>,
}

impl BatchState {
    pub fn new(file_ids: Vec<FileId>) -> Self {
        BatchState {
            file_ids,
            step: 0,
            result: None,
        }
    }
}

/// The outcome of a completed batch (spec §6, `complete` event payload).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchResult {
    pub successful: Vec<FileId>,
    pub failed: Vec<FileId>,
    pub upload_id: BatchId,
}

/// What an installed uploader can promise the rest of the system (spec §3,
/// `capabilities`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub upload_progress: bool,
    pub individual_cancellation: bool,
    pub resumable_uploads: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            upload_progress: true,
            individual_cancellation: true,
            resumable_uploads: false,
        }
    }
}

/// A transient, user-visible message (spec §7, "User-visible failures").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoMessage {
    pub is_hidden: bool,
    #[serde(rename = "type")]
    pub kind: InfoKind,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoKind {
    Info,
    Warning,
    Error,
}

/// The single session state held by the store (spec §3, "Session state").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub files: HashMap<FileId, FileRecord>,
    pub current_uploads: HashMap<BatchId, BatchState>,
    pub allow_new_upload: bool,
    pub capabilities: Capabilities,
    pub total_progress: u8,
    pub meta: HashMap<String, Value>,
    pub info: Option<InfoMessage>,
    pub plugins: HashMap<String, Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            files: HashMap::new(),
            current_uploads: HashMap::new(),
            allow_new_upload: true,
            capabilities: Capabilities::default(),
            total_progress: 0,
            meta: HashMap::new(),
            info: None,
            plugins: HashMap::new(),
        }
    }
}

impl SessionState {
    /// Files that are in progress: handed to an uploader, not yet terminal
    /// (spec §4.F, "in-progress set").
    pub fn in_progress_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values().filter(|f| f.is_in_progress())
    }

    /// Prune batches that reference a file no longer present (spec §3
    /// invariant 1). Batches emptied by the prune are removed entirely.
    pub fn prune_dead_batches(&mut self) {
        let mut dead = Vec::new();
        for (batch_id, batch) in self.current_uploads.iter_mut() {
            batch.file_ids.retain(|id| self.files.contains_key(id));
            if batch.file_ids.is_empty() {
                dead.push(batch_id.clone());
            }
        }
        for id in dead {
            self.current_uploads.remove(&id);
        }
    }
}
