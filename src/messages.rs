//! Commands accepted by the `Kernel` (spec §4.G, the `addFile`/`removeFile`/
//! `setState`/... surface), grouped here the way the teacher groups the
//! signals its actors exchange in `messages.rs`.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{BatchId, FileId};

/// A file handed to the kernel by an acquisition source, not yet admitted
/// (spec §4.D).
#[derive(Clone, Debug)]
pub struct NewFile {
    pub source: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub last_modified: Option<i64>,
    pub data: Vec<u8>,
    pub meta: HashMap<String, Value>,
}

/// A partial update to one file's meta map (spec §4.G, `setFileMeta`).
#[derive(Clone, Debug)]
pub struct SetFileMeta {
    pub file_id: FileId,
    pub meta: HashMap<String, Value>,
}

/// Which fields of a file's mutable state to overwrite
/// (spec §4.G, `setFileState`). `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct SetFileState {
    pub is_paused: Option<bool>,
    pub error: Option<Option<String>>,
    pub upload_url: Option<Option<String>>,
}

/// Request to begin uploading a set of files as one batch
/// (spec §4.H, `upload()`). `None` means "every file currently eligible".
#[derive(Clone, Debug, Default)]
pub struct StartUpload {
    pub file_ids: Option<Vec<FileId>>,
}

#[derive(Clone, Debug)]
pub struct RetryUpload {
    pub file_id: FileId,
}

#[derive(Clone, Debug)]
pub struct CancelUpload {
    pub batch_id: Option<BatchId>,
}
