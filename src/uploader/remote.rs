//! Companion-proxied remote uploader (spec §4.J): for a file acquired from a
//! remote provider (a shared drive link, a URL import, ...) the upload
//! itself is performed by the companion server. The kernel first submits the
//! job over plain HTTP, then watches a token-scoped WebSocket for progress
//! frames until the companion reports the file done.
//!
//! Grounded on the teacher's `server::ts` websocket proxy: connect, split
//! into a sink/stream pair, and dispatch inbound frames by a tagged field.
//! Flipped from "agent as websocket server" to "agent as websocket client",
//! since here the companion is the server; one connection is opened per
//! file rather than multiplexing a shared socket, so there's no queue-until-
//! open state to track. The POST-then-token-socket handshake itself follows
//! `companion::Client::submit_remote_upload`'s job-submission contract.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::companion;
use crate::events::{Event, EventBus};
use crate::kernel::plugin::Uploader as UploaderTrait;
use crate::progress::Throttle;
use crate::store::{Store, StatePatch};
use crate::types::{FileId, UploadResponse};

use super::error::{Error, Result};

/// Frames the companion pushes over the token-scoped socket, tagged by
/// `action` with the rest of the frame nested under `payload` (spec §4.J).
#[derive(Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "lowercase")]
enum IncomingFrame {
    Progress {
        #[serde(rename = "bytesUploaded")]
        bytes_uploaded: u64,
        #[serde(rename = "bytesTotal")]
        bytes_total: Option<u64>,
    },
    Success {
        status: u16,
        body: Value,
    },
    Error {
        message: String,
    },
}

/// `https://`/`http://` companion URLs derive their websocket counterpart by
/// scheme substitution; the companion serves both on the same host.
fn websocket_url(companion_url: &str) -> String {
    if let Some(rest) = companion_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = companion_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        companion_url.to_owned()
    }
}

/// Minimum spacing between emitted progress events for the same file (spec
/// §4.J, "progress is throttled the same as the direct uploader").
const PROGRESS_THROTTLE: Duration = Duration::from_millis(300);

pub struct RemoteUploader {
    id: String,
    companion: std::sync::Arc<companion::Client>,
    throttles: Mutex<HashMap<FileId, Throttle>>,
}

impl RemoteUploader {
    pub fn new(companion: std::sync::Arc<companion::Client>) -> Self {
        RemoteUploader {
            id: "uploader-remote".to_owned(),
            companion,
            throttles: Mutex::new(HashMap::new()),
        }
    }

    fn should_emit_progress(&self, file_id: &FileId) -> bool {
        self.throttles
            .lock()
            .unwrap()
            .entry(file_id.clone())
            .or_insert_with(|| Throttle::new(PROGRESS_THROTTLE))
            .should_emit(Instant::now())
    }

    async fn run_file(&self, file_id: &FileId, store: &Store, events: &EventBus) -> Result<()> {
        let state = store.get_state();
        let file = state.files.get(file_id).cloned().ok_or_else(|| {
            Error::request_failed(format!("file {} vanished before upload", file_id))
        })?;
        let remote = file
            .remote
            .as_ref()
            .ok_or_else(|| Error::request_failed("file has no remote descriptor"))?;

        let token = match &remote.token {
            Some(token) => token.clone(),
            None => {
                let job = self
                    .companion
                    .submit_remote_upload(&remote.provider, &remote.body)
                    .await
                    .map_err(|e| Error::request_failed(e.to_string()))?;
                let token = job
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::request_failed("companion response carried no token"))?
                    .to_owned();

                let mut state = store.get_state();
                if let Some(record) = state.files.get_mut(file_id) {
                    if let Some(remote) = record.remote.as_mut() {
                        remote.token = Some(token.clone());
                    }
                }
                store.set_state(StatePatch {
                    files: Some(state.files),
                    ..Default::default()
                });
                token
            }
        };

        let base = websocket_url(&remote.companion_url);
        let url = format!("{}/api/{}", base.trim_end_matches('/'), token);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::socket_error(e.to_string()))?;
        let (mut _sink, mut stream) = ws_stream.split();

        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| Error::socket_error(e.to_string()))?;
            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            let frame: IncomingFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            match frame {
                IncomingFrame::Progress {
                    bytes_uploaded,
                    bytes_total,
                } => {
                    if self.should_emit_progress(file_id) {
                        events.emit(Event::UploadProgress {
                            file_id: file_id.clone(),
                            uploader: self.id.clone(),
                            bytes_uploaded,
                            bytes_total,
                        });
                    }
                }
                IncomingFrame::Success { status, body } => {
                    let mut state = store.get_state();
                    if let Some(record) = state.files.get_mut(file_id) {
                        record.progress.upload_complete = true;
                        record.response = Some(UploadResponse { status, body });
                    }
                    store.set_state(StatePatch {
                        files: Some(state.files),
                        ..Default::default()
                    });
                    events.emit(Event::UploadSuccess {
                        file_id: file_id.clone(),
                        status,
                    });
                    self.throttles.lock().unwrap().remove(file_id);
                    return Ok(());
                }
                IncomingFrame::Error { message } => {
                    self.throttles.lock().unwrap().remove(file_id);
                    return Err(Error::request_failed(message));
                }
            }
        }
        self.throttles.lock().unwrap().remove(file_id);
        Err(Error::socket_error("connection closed before the companion reported completion"))
    }
}

#[async_trait]
impl UploaderTrait for RemoteUploader {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, file_ids: &[FileId], store: &Store, events: &EventBus) -> crate::Result<()> {
        let results =
            futures::future::join_all(file_ids.iter().map(|id| self.run_file(id, store, events))).await;

        let mut first_err = None;
        for (file_id, result) in file_ids.iter().zip(results) {
            if let Err(err) = result {
                events.emit(Event::UploadError {
                    file_id: file_id.clone(),
                    message: err.to_string(),
                });
                let mut state = store.get_state();
                if let Some(record) = state.files.get_mut(file_id) {
                    record.error = Some(err.to_string());
                }
                store.set_state(StatePatch {
                    files: Some(state.files),
                    ..Default::default()
                });
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
