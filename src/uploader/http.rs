//! Direct HTTP uploader (spec §4.I): posts each file, or a bundle of files
//! in one request, to a configured endpoint with `reqwest`.
//!
//! Progress reporting is grounded on the teacher's
//! `upload::worker::DatabaseUpdater`, a `ProgressCallback` that turns each
//! part's `bytes_sent`/`size` into a status update; here that update is an
//! `UploadProgress` event instead of a direct database write. Concurrency is
//! gated by a `Limiter` (spec §5) sized from the engine's configured upload
//! concurrency, the same guarantee the teacher's `CpuPool`-bounded worker
//! gave per-file imports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::stream;
use reqwest::{multipart, Client, Method};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;

use crate::config::XhrConfig;
use crate::events::{Event, EventBus};
use crate::kernel::plugin::Uploader as UploaderTrait;
use crate::limiter::Limiter;
use crate::store::{Store, StatePatch};
use crate::types::{FileId, FileRecord, UploadResponse};

use super::error::{Error, Result};

/// Size of each chunk streamed to the server; small enough that progress and
/// the stall timer both see regular ticks for any but the tiniest files.
const CHUNK_SIZE: usize = 64 * 1024;

fn chunk_bytes(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return vec![Bytes::new()];
    }
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Polls `rx` for the next chunk-sent tick, or waits forever once the
/// channel has been drained and closed so a `select!` loop doesn't spin on
/// repeated `None`s while the response is still in flight.
async fn next_tick(rx: &mut Option<UnboundedReceiver<u64>>) -> Option<u64> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

pub struct HttpUploader {
    id: String,
    config: XhrConfig,
    client: Client,
    limiter: Limiter,
    stall_timeout: Duration,
    cancellations: Arc<Mutex<HashMap<FileId, Arc<Notify>>>>,
    watching: AtomicBool,
}

impl HttpUploader {
    pub fn new(config: XhrConfig, concurrency: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());
        HttpUploader {
            id: "uploader-http-direct".to_owned(),
            limiter: Limiter::new(concurrency),
            stall_timeout: Duration::from_millis(config.timeout_ms.max(1_000)),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            watching: AtomicBool::new(false),
            config,
            client,
        }
    }

    /// Subscribes to `file-removed`/`cancel-all` once per uploader instance
    /// so an in-flight `upload_one` can be aborted selectively (spec §4.I).
    /// Registering more than once would pile up duplicate listeners on the
    /// event bus across batches, so this only runs the first time it's
    /// called.
    fn watch_cancellations(&self, events: &EventBus) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancellations = self.cancellations.clone();
        events.on("file-removed", move |event| {
            if let Event::FileRemoved(id) = event {
                if let Some(notify) = cancellations.lock().unwrap().get(id) {
                    notify.notify_one();
                }
            }
        });
        let cancellations = self.cancellations.clone();
        events.on("cancel-all", move |_| {
            for notify in cancellations.lock().unwrap().values() {
                notify.notify_one();
            }
        });
    }

    /// Per-file headers win over the uploader's own configured headers
    /// (spec §4.I, "header merge order").
    fn merged_headers(&self, file_headers: &HashMap<String, String>) -> HashMap<String, String> {
        let mut headers = self.config.headers.clone();
        headers.extend(file_headers.clone());
        headers
    }

    fn method(&self) -> Method {
        self.config.method.parse().unwrap_or(Method::POST)
    }

    async fn upload_one(&self, file_id: &FileId, store: &Store, events: &EventBus) -> Result<()> {
        self.watch_cancellations(events);
        let _permit = self.limiter.acquire().await;

        let file = store.get_state().files.get(file_id).cloned().ok_or_else(|| {
            Error::request_failed(format!("file {} vanished before upload", file_id))
        })?;

        let notify = Arc::new(Notify::new());
        self.cancellations.lock().unwrap().insert(file_id.clone(), notify.clone());
        let result = self.send_with_progress(file_id, &file, store, events, &notify).await;
        self.cancellations.lock().unwrap().remove(file_id);
        result
    }

    /// Streams `file`'s bytes to the endpoint in fixed-size chunks, emitting
    /// an `upload-progress` event per chunk sent and resetting the stall
    /// timer on every tick, so a request that keeps making progress is never
    /// killed no matter how long it takes overall (spec §4.I). Watches
    /// `notify` for a selective `file-removed`/`cancel-all` abort alongside
    /// the request itself.
    async fn send_with_progress(
        &self,
        file_id: &FileId,
        file: &FileRecord,
        store: &Store,
        events: &EventBus,
        notify: &Notify,
    ) -> Result<()> {
        let total = file.size.unwrap_or(file.data.len() as u64);
        let (tick_tx, tick_rx) = mpsc::unbounded_channel::<u64>();
        let chunks = chunk_bytes(&file.data, CHUNK_SIZE);
        let body_stream = stream::iter(chunks.into_iter().map(move |chunk| {
            let _ = tick_tx.send(chunk.len() as u64);
            Ok::<Bytes, std::io::Error>(chunk)
        }));
        let part = multipart::Part::stream(reqwest::Body::wrap_stream(body_stream))
            .file_name(file.name.clone());
        let form = multipart::Form::new().part(self.config.field_name.clone(), part);

        let mut request = self.client.request(self.method(), &self.config.endpoint).multipart(form);
        for (key, value) in self.merged_headers(&HashMap::new()) {
            request = request.header(key, value);
        }

        let send_fut = request.send();
        tokio::pin!(send_fut);
        let mut stall_deadline = Box::pin(tokio::time::sleep(self.stall_timeout));
        let mut tick_rx = Some(tick_rx);
        let mut bytes_uploaded: u64 = 0;
        let started = tokio::time::Instant::now();

        let response = loop {
            tokio::select! {
                res = &mut send_fut => break res.map_err(Error::from)?,
                _ = &mut stall_deadline => {
                    return Err(Error::stalled(started.elapsed().as_secs()));
                }
                _ = notify.notified() => {
                    return Err(Error::file_removed());
                }
                tick = next_tick(&mut tick_rx) => {
                    match tick {
                        Some(n) => {
                            bytes_uploaded = (bytes_uploaded + n).min(total);
                            events.emit(Event::UploadProgress {
                                file_id: file_id.clone(),
                                uploader: self.id.clone(),
                                bytes_uploaded,
                                bytes_total: Some(total),
                            });
                            stall_deadline.as_mut().reset(tokio::time::Instant::now() + self.stall_timeout);
                        }
                        None => tick_rx = None,
                    }
                }
            }
        };
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::server_rejected(status, body));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        self.mark_complete(store, &[file.clone()], status, &body);
        events.emit(Event::UploadSuccess {
            file_id: file_id.clone(),
            status,
        });
        Ok(())
    }

    /// Sends every file as one multipart request. Progress can't be
    /// observed mid-request without a custom streaming body, so the single
    /// completion is apportioned across files by declared size: no one
    /// file's progress event can dwarf the others (spec §4.I, "bundle-mode
    /// proportional progress apportionment").
    async fn upload_bundle(&self, file_ids: &[FileId], store: &Store, events: &EventBus) -> Result<()> {
        let _permit = self.limiter.acquire().await;

        let state = store.get_state();
        let files: Vec<FileRecord> = file_ids
            .iter()
            .filter_map(|id| state.files.get(id).cloned())
            .collect();

        let mut form = multipart::Form::new();
        for file in &files {
            let part = multipart::Part::bytes(file.data.to_vec()).file_name(file.name.clone());
            form = form.part(self.config.field_name.clone(), part);
        }

        let mut request = self.client.request(self.method(), &self.config.endpoint).multipart(form);
        for (key, value) in self.config.headers.clone() {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.stall_timeout, request.send())
            .await
            .map_err(|_| Error::stalled(self.stall_timeout.as_secs()))??;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::server_rejected(status, body));
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);

        for file in &files {
            let share = file.size.unwrap_or(0);
            events.emit(Event::UploadProgress {
                file_id: file.id.clone(),
                uploader: self.id.clone(),
                bytes_uploaded: share,
                bytes_total: Some(share),
            });
        }
        self.mark_complete(store, &files, status, &body);
        for file in &files {
            events.emit(Event::UploadSuccess {
                file_id: file.id.clone(),
                status,
            });
        }
        Ok(())
    }

    fn mark_complete(&self, store: &Store, files: &[FileRecord], status: u16, body: &Value) {
        let mut state = store.get_state();
        for file in files {
            if let Some(record) = state.files.get_mut(&file.id) {
                record.progress.upload_complete = true;
                record.progress.bytes_uploaded = file.size.unwrap_or(0);
                record.response = Some(UploadResponse {
                    status,
                    body: body.clone(),
                });
            }
        }
        store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
    }
}

#[async_trait]
impl UploaderTrait for HttpUploader {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, file_ids: &[FileId], store: &Store, events: &EventBus) -> crate::Result<()> {
        if self.config.bundle {
            return self.upload_bundle(file_ids, store, events).await.map_err(Into::into);
        }

        let results = join_all(file_ids.iter().map(|id| self.upload_one(id, store, events))).await;

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

    async fn install(&self, store: &Store) -> crate::Result<()> {
        if self.config.bundle {
            let mut state = store.get_state();
            state.capabilities.individual_cancellation = false;
            store.set_state(StatePatch {
                capabilities: Some(state.capabilities),
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn uninstall(&self, store: &Store) -> crate::Result<()> {
        if self.config.bundle {
            let mut state = store.get_state();
            state.capabilities.individual_cancellation = true;
            store.set_state(StatePatch {
                capabilities: Some(state.capabilities),
                ..Default::default()
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn per_file_headers_override_configured_ones() {
        let mut config = XhrConfig::default();
        config.headers.insert("x-source".into(), "default".into());
        let uploader = HttpUploader::new(config, 2);

        let mut file_headers = HashMap::new();
        file_headers.insert("x-source".into(), "override".into());
        file_headers.insert("x-extra".into(), "1".into());

        let merged = uploader.merged_headers(&file_headers);
        assert_eq!(merged.get("x-source"), Some(&"override".to_owned()));
        assert_eq!(merged.get("x-extra"), Some(&"1".to_owned()));
    }

    #[test]
    fn falls_back_to_post_for_an_unparsable_method() {
        let mut config = XhrConfig::default();
        config.method = "not-a-method!!".into();
        let uploader = HttpUploader::new(config, 1);
        assert_eq!(uploader.method(), Method::POST);
    }

    #[tokio::test]
    async fn bundle_mode_install_disables_individual_cancellation_and_uninstall_restores_it() {
        let mut config = XhrConfig::default();
        config.bundle = true;
        let uploader = HttpUploader::new(config, 1);
        let store = Store::new();

        assert!(store.get_state().capabilities.individual_cancellation);

        uploader.install(&store).await.unwrap();
        assert!(!store.get_state().capabilities.individual_cancellation);

        uploader.uninstall(&store).await.unwrap();
        assert!(store.get_state().capabilities.individual_cancellation);
    }

    #[tokio::test]
    async fn non_bundle_install_leaves_individual_cancellation_untouched() {
        let config = XhrConfig::default();
        let uploader = HttpUploader::new(config, 1);
        let store = Store::new();

        uploader.install(&store).await.unwrap();
        assert!(store.get_state().capabilities.individual_cancellation);
    }
}
