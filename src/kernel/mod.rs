//! Plugin kernel (spec §4.G): the facade every caller (acquisition sources,
//! UI targets, external scripts) talks to. Owns the store, event bus,
//! translator and installed plugin registry, and delegates batch
//! orchestration to a `pipeline::Coordinator`.
//!
//! Grounded on the teacher's `agent::Agent`/`AgentHandle` bring-up: one
//! long-lived struct wired to its collaborators at construction and handed
//! out behind an `Arc` so every caller shares the same instance. The
//! teacher wraps its agent in an `actix::Actor`; this kernel stays a plain
//! struct with async methods instead, so it can be exercised in tests
//! without a running `actix::System` (see `DESIGN.md`).

mod debounce;
pub mod plugin;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use self::debounce::Debounce;
pub use self::plugin::{Plugin, PluginKind, Postprocessor, Preprocessor, UiPlugin, Uploader};

use crate::companion;
use crate::config::Config;
use crate::database::Database;
use crate::events::{Event, EventBus};
use crate::identity::{self, Acquisition};
use crate::messages::{CancelUpload, NewFile, RetryUpload, SetFileMeta, SetFileState, StartUpload};
use crate::pipeline::{Coordinator, Step};
use crate::progress;
use crate::restrictions;
use crate::store::{Store, StatePatch};
use crate::translate::Translator;
use crate::types::{BatchId, FileId, FileProgress, FileRecord, SessionState};
use crate::{Error, Result};

/// A caller-supplied check run before a file is admitted (spec §4.G,
/// `onBeforeFileAdded`). Returning `Err` rejects the file with that reason.
pub type BeforeFileAddedHook =
    Box<dyn Fn(&FileRecord, &HashMap<FileId, FileRecord>) -> std::result::Result<(), String> + Send + Sync>;

/// A caller-supplied check run before a batch starts (spec §4.G,
/// `onBeforeUpload`). Returning `Err` aborts the whole `upload()` call.
pub type BeforeUploadHook =
    Box<dyn Fn(&HashMap<FileId, FileRecord>) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_file_added: Mutex<Vec<BeforeFileAddedHook>>,
    before_upload: Mutex<Vec<BeforeUploadHook>>,
}

/// Shared handle to a running kernel (spec GLOSSARY, "Kernel").
pub struct Kernel {
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
    pub translator: Mutex<Translator>,
    pub config: Config,
    pub companion: Option<Arc<companion::Client>>,
    pipeline: Coordinator,
    plugins: RwLock<Vec<Plugin>>,
    running: Mutex<HashMap<BatchId, JoinHandle<()>>>,
    render_debounce: Debounce,
    auto_proceed_debounce: Debounce,
    progress_throttle: Mutex<progress::Throttle>,
    hooks: Hooks,
}

impl Kernel {
    pub fn new(config: Config, database: Option<Database>) -> Arc<Kernel> {
        let render_debounce = Debounce::new(Duration::from_millis(config.engine.render_debounce_ms));
        let auto_proceed_debounce = Debounce::new(Duration::from_millis(4));
        let progress_throttle =
            Mutex::new(progress::Throttle::new(Duration::from_millis(config.engine.progress_throttle_ms)));

        let tokens: Option<Box<dyn companion::TokenStore>> = database
            .clone()
            .map(|db| Box::new(companion::DatabaseTokenStore::new(db)) as Box<dyn companion::TokenStore>);
        let companion = Some(Arc::new(companion::Client::new(config.companion.clone(), tokens)));

        let kernel = Arc::new(Kernel {
            store: Arc::new(Store::new()),
            events: Arc::new(EventBus::new()),
            translator: Mutex::new(Translator::new()),
            companion,
            pipeline: Coordinator::new(database),
            plugins: RwLock::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            render_debounce,
            auto_proceed_debounce,
            progress_throttle,
            hooks: Hooks::default(),
            config,
        });

        let render_kernel = kernel.clone();
        kernel.store.subscribe(move |_prev, next, _patch| {
            render_kernel.events.emit(Event::StateUpdate);
            render_kernel.schedule_render(next.clone());
        });

        let progress_kernel = kernel.clone();
        kernel.events.on("upload-progress", move |event| {
            if let Event::UploadProgress {
                file_id,
                bytes_uploaded,
                bytes_total,
                ..
            } = event
            {
                progress_kernel.on_upload_progress(file_id, *bytes_uploaded, *bytes_total);
            }
        });

        kernel
    }

    // -- plugin registry (spec §4.G, `use`/`getPlugin`/`removePlugin`/`iteratePlugins`) --

    /// Installs a plugin. Fails synchronously if its id is empty or already
    /// taken (spec §4.G, "configuration errors are thrown, never silently
    /// dropped").
    pub async fn use_plugin(self: &Arc<Self>, plugin: Plugin) -> Result<()> {
        let id = plugin.id().to_owned();
        if id.is_empty() {
            return Err(Error::plugin_missing_id());
        }
        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|p| p.id() == id) {
            return Err(Error::plugin_already_registered(id));
        }
        plugin.install(&self.store).await?;
        plugins.push(plugin);
        Ok(())
    }

    /// Runs `f` against the plugin with the given id, if installed.
    pub async fn with_plugin<R>(&self, id: &str, f: impl FnOnce(&Plugin) -> R) -> Option<R> {
        let plugins = self.plugins.read().await;
        plugins.iter().find(|p| p.id() == id).map(f)
    }

    /// Uninstalls a plugin by id. Idempotent: removing an id twice, or one
    /// never installed, is simply a no-op.
    pub async fn remove_plugin(&self, id: &str) -> bool {
        let mut plugins = self.plugins.write().await;
        let removed = match plugins.iter().position(|p| p.id() == id) {
            Some(pos) => plugins.remove(pos),
            None => return false,
        };
        drop(plugins);
        let _ = removed.uninstall(&self.store).await;
        true
    }

    /// Every installed plugin id, grouped by kind in (type, insertion)
    /// order: preprocessors, then uploaders, then postprocessors, then UI
    /// targets (spec §9 REDESIGN FLAGS, "the sole iteration primitive").
    pub async fn iterate_plugins(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        plugin::PLUGIN_KINDS
            .iter()
            .flat_map(|kind| {
                plugins
                    .iter()
                    .filter(move |p| p.kind() == *kind)
                    .map(|p| p.id().to_owned())
            })
            .collect()
    }

    /// Registers a check run against every candidate file before it's
    /// admitted (spec §4.G, `onBeforeFileAdded`). Hooks run in registration
    /// order; the first rejection wins.
    pub fn on_before_file_added<F>(&self, hook: F)
    where
        F: Fn(&FileRecord, &HashMap<FileId, FileRecord>) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.before_file_added.lock().unwrap().push(Box::new(hook));
    }

    /// Registers a check run against the whole candidate batch before
    /// `upload()` starts it (spec §4.G, `onBeforeUpload`).
    pub fn on_before_upload<F>(&self, hook: F)
    where
        F: Fn(&HashMap<FileId, FileRecord>) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.before_upload.lock().unwrap().push(Box::new(hook));
    }

    /// Registers a render target and immediately schedules a first render
    /// (spec §4.G, `mount`).
    pub async fn mount(self: &Arc<Self>, ui: Box<dyn UiPlugin>) -> Result<()> {
        self.use_plugin(Plugin::Ui(ui)).await?;
        self.schedule_render(self.get_state());
        Ok(())
    }

    fn schedule_render(self: &Arc<Self>, state: SessionState) {
        let kernel = self.clone();
        self.render_debounce.trigger(move || {
            tokio::spawn(async move {
                let mut plugins = kernel.plugins.write().await;
                for plugin in plugins.iter_mut() {
                    if let Plugin::Ui(ui) = plugin {
                        ui.render(&state);
                    }
                }
            });
        });
    }

    /// Tears the kernel down: aborts any running batch and cancels pending
    /// debounced work (spec §4.G, `close`).
    pub fn close(&self) {
        for (_, handle) in self.running.lock().unwrap().drain() {
            handle.abort();
        }
        self.render_debounce.cancel();
        self.auto_proceed_debounce.cancel();
    }

    // -- file records (spec §4.G, `addFile`/`removeFile`/`getFile`/`getFiles`) --

    /// Types, admits and stores a new file (spec §4.D admission, §4.E
    /// restrictions). Restriction failures are surfaced as a
    /// `restriction-failed` event as well as an error, matching the
    /// "never silent" admission contract (spec §7.1).
    pub fn add_file(self: &Arc<Self>, new_file: NewFile) -> Result<FileId> {
        let acquisition = Acquisition {
            source: &new_file.source,
            declared_name: new_file.name.as_deref(),
            declared_mime_type: new_file.mime_type.as_deref(),
            last_modified: new_file.last_modified,
            data: &new_file.data,
        };
        let id = FileId(identity::generate_file_id(&acquisition));
        let name = identity::resolve_file_name(&acquisition);
        let (_, extension) = identity::split_name_and_extension(&name);
        let mime_type = identity::infer_mime_type(&acquisition, extension.as_deref());
        let size = Some(new_file.data.len() as u64);

        let record = FileRecord {
            id: id.clone(),
            source: new_file.source,
            name,
            extension,
            mime_type,
            data: Bytes::from(new_file.data),
            size,
            meta: new_file.meta,
            progress: FileProgress::default(),
            is_paused: false,
            error: None,
            response: None,
            upload_url: None,
            is_remote: false,
            remote: None,
        };

        if let Err(err) = restrictions::check_file(&self.config.restrictions, &record) {
            self.events.emit(Event::RestrictionFailed {
                file_id: Some(id.clone()),
                message: err.to_string(),
            });
            return Err(err.into());
        }

        let mut state = self.store.get_state();
        if let Err(err) = restrictions::check_session_capacity(&self.config.restrictions, &state, &record) {
            self.events.emit(Event::RestrictionFailed {
                file_id: Some(id.clone()),
                message: err.to_string(),
            });
            return Err(err.into());
        }

        for hook in self.hooks.before_file_added.lock().unwrap().iter() {
            if let Err(reason) = hook(&record, &state.files) {
                self.events.emit(Event::RestrictionFailed {
                    file_id: Some(id.clone()),
                    message: reason.clone(),
                });
                return Err(Error::file_rejected(reason));
            }
        }

        state.files.insert(id.clone(), record);
        self.store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
        self.events.emit(Event::FileAdded(id.clone()));

        if self.config.engine.auto_proceed {
            self.schedule_auto_proceed();
        }

        Ok(id)
    }

    /// Debounces a call to `upload()` so that files added in quick
    /// succession are batched into one upload rather than one per file
    /// (spec §9 REDESIGN FLAGS, "auto-proceed goes through the same
    /// cancellable debounce primitive as rendering").
    fn schedule_auto_proceed(self: &Arc<Self>) {
        let kernel = self.clone();
        self.auto_proceed_debounce.trigger(move || {
            let _ = kernel.upload(StartUpload::default());
        });
    }

    /// Removes a file record, pruning any batch left referencing it.
    /// Idempotent: removing an id not present is a no-op (spec §9,
    /// "removeFile is idempotent").
    pub fn remove_file(&self, id: &FileId) {
        let mut state = self.store.get_state();
        if state.files.remove(id).is_none() {
            return;
        }
        state.prune_dead_batches();
        self.store.set_state(StatePatch {
            files: Some(state.files),
            current_uploads: Some(state.current_uploads),
            ..Default::default()
        });
        self.events.emit(Event::FileRemoved(id.clone()));
    }

    pub fn get_file(&self, id: &FileId) -> Option<FileRecord> {
        self.store.get_state().files.get(id).cloned()
    }

    pub fn get_files(&self) -> Vec<FileRecord> {
        self.store.get_state().files.into_values().collect()
    }

    pub fn get_state(&self) -> SessionState {
        self.store.get_state()
    }

    pub fn set_state(&self, patch: StatePatch) {
        self.store.set_state(patch);
    }

    /// Merges into session-level metadata (spec §4.G, `setMeta`).
    pub fn set_meta(&self, meta: HashMap<String, Value>) {
        let mut state = self.store.get_state();
        state.meta.extend(meta);
        self.store.set_state(StatePatch {
            meta: Some(state.meta),
            ..Default::default()
        });
    }

    /// Merges into one file's metadata. Merge is associative: applying two
    /// patches in sequence equals applying their union (spec §9).
    pub fn set_file_meta(&self, msg: SetFileMeta) -> Result<()> {
        let mut state = self.store.get_state();
        let file = state
            .files
            .get_mut(&msg.file_id)
            .ok_or_else(|| Error::file_not_found(msg.file_id.to_string()))?;
        file.meta.extend(msg.meta);
        self.store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
        Ok(())
    }

    /// Overwrites only the fields `msg` names (spec §4.G, `setFileState`).
    pub fn set_file_state(&self, file_id: &FileId, msg: SetFileState) -> Result<()> {
        let mut state = self.store.get_state();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| Error::file_not_found(file_id.to_string()))?;
        if let Some(is_paused) = msg.is_paused {
            file.is_paused = is_paused;
        }
        if let Some(error) = msg.error {
            file.error = error;
        }
        if let Some(upload_url) = msg.upload_url {
            file.upload_url = upload_url;
        }
        self.store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
        Ok(())
    }

    /// Resets one file's progress to its initial state, used before a retry
    /// (spec §4.G, `resetProgress`).
    pub fn reset_progress(&self, file_id: &FileId) -> Result<()> {
        let mut state = self.store.get_state();
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| Error::file_not_found(file_id.to_string()))?;
        file.progress = FileProgress::default();
        self.store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
        Ok(())
    }

    fn on_upload_progress(&self, file_id: &FileId, bytes_uploaded: u64, bytes_total: Option<u64>) {
        let mut state = self.store.get_state();
        if let Some(file) = state.files.get_mut(file_id) {
            file.progress.bytes_uploaded = bytes_uploaded;
            file.progress.bytes_total = bytes_total;
            file.progress.percentage = progress::file_percentage(&file.progress);
        }
        let total = progress::aggregate_percentage(&state);
        let should_emit = self.progress_throttle.lock().unwrap().should_emit(Instant::now());
        if should_emit {
            self.store.set_state(StatePatch {
                files: Some(state.files),
                total_progress: Some(total),
                ..Default::default()
            });
            self.events.emit(Event::Progress(total));
        }
    }

    // -- upload orchestration (spec §4.H) --

    /// Starts a new batch for the given files, or every eligible file if
    /// none are named, checking `minNumberOfFiles` only here, never on
    /// `addFile` (spec §4.E). Eligible means not already assigned to any
    /// batch and never started (spec §4.H step 3): `progress.uploadStarted`
    /// is null and the id isn't already sitting in `currentUploads`.
    pub fn upload(self: &Arc<Self>, request: StartUpload) -> Result<BatchId> {
        let state = self.store.get_state();
        restrictions::check_minimum_files(&self.config.restrictions, &state)?;

        if !state.allow_new_upload {
            return Err(Error::upload_not_allowed());
        }

        for hook in self.hooks.before_upload.lock().unwrap().iter() {
            if let Err(reason) = hook(&state.files) {
                return Err(Error::upload_rejected(reason));
            }
        }

        let file_ids = match request.file_ids {
            Some(ids) => ids,
            None => {
                let busy: std::collections::HashSet<&FileId> = state
                    .current_uploads
                    .values()
                    .flat_map(|batch| batch.file_ids.iter())
                    .collect();
                state
                    .files
                    .iter()
                    .filter(|(id, f)| f.progress.upload_started.is_none() && !busy.contains(id))
                    .map(|(id, _)| id.clone())
                    .collect()
            }
        };

        self.mark_upload_started(&file_ids);

        if !self.config.engine.allow_multiple_uploads {
            self.store.set_state(StatePatch {
                allow_new_upload: Some(false),
                ..Default::default()
            });
        }

        let batch_id = BatchId(Uuid::new_v4().to_string());
        self.spawn_batch(batch_id.clone(), file_ids, Step::Created);
        Ok(batch_id)
    }

    /// Stamps `progress.uploadStarted` on every file about to be handed to
    /// a new batch, so a subsequent bare `upload()` call never re-selects
    /// it (spec §4.H step 3).
    fn mark_upload_started(&self, file_ids: &[FileId]) {
        if file_ids.is_empty() {
            return;
        }
        let mut state = self.store.get_state();
        let now = crate::util::temporal::now();
        for id in file_ids {
            if let Some(file) = state.files.get_mut(id) {
                file.progress.upload_started = Some(now);
            }
        }
        self.store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });
    }

    fn spawn_batch(self: &Arc<Self>, batch_id: BatchId, file_ids: Vec<FileId>, resume_from: Step) {
        let kernel = self.clone();
        let handle_id = batch_id.clone();
        let handle = tokio::spawn(async move {
            let plugins = kernel.plugins.read().await;
            let result = kernel
                .pipeline
                .run_batch(
                    &batch_id,
                    file_ids.clone(),
                    &plugins,
                    &kernel.store,
                    &kernel.events,
                    resume_from,
                )
                .await;
            drop(plugins);
            let still_running = {
                let mut running = kernel.running.lock().unwrap();
                running.remove(&batch_id);
                !running.is_empty()
            };
            if !kernel.config.engine.allow_multiple_uploads && !still_running {
                kernel.store.set_state(StatePatch {
                    allow_new_upload: Some(true),
                    ..Default::default()
                });
            }
            if let Err(err) = result {
                for file_id in &file_ids {
                    kernel.events.emit(Event::UploadError {
                        file_id: file_id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        });
        self.running.lock().unwrap().insert(handle_id, handle);
    }

    /// Resubmits every persisted batch that never reached completion,
    /// called once at startup (spec §4.H, restore on restart), each picking
    /// back up from the stage it last finished.
    pub fn recover_batches(self: &Arc<Self>) -> Result<()> {
        for (batch_id, file_ids, step) in self.pipeline.recoverable_batches()? {
            self.spawn_batch(batch_id, file_ids, step);
        }
        Ok(())
    }

    /// Resumes one specific batch left behind by a prior process (spec §6,
    /// `restore(batchId)`). Unlike `recover_batches`, this targets a single
    /// persisted batch by id rather than every one found at startup.
    pub fn restore(self: &Arc<Self>, batch_id: &BatchId) -> Result<()> {
        let (_, file_ids, step) = self
            .pipeline
            .recoverable_batches()?
            .into_iter()
            .find(|(id, _, _)| id == batch_id)
            .ok_or_else(|| Error::batch_not_found(batch_id.to_string()))?;
        self.spawn_batch(batch_id.clone(), file_ids, step);
        Ok(())
    }

    /// Clears a file's error and progress and resubmits it as a new batch
    /// (spec §4.H, `retryUpload`).
    pub fn retry_upload(self: &Arc<Self>, msg: RetryUpload) -> Result<BatchId> {
        self.reset_progress(&msg.file_id)?;
        self.set_file_state(
            &msg.file_id,
            SetFileState {
                error: Some(None),
                ..Default::default()
            },
        )?;
        self.events.emit(Event::UploadRetry(msg.file_id.clone()));
        self.mark_upload_started(std::slice::from_ref(&msg.file_id));
        let batch_id = BatchId(Uuid::new_v4().to_string());
        self.spawn_batch(batch_id.clone(), vec![msg.file_id], Step::Created);
        Ok(batch_id)
    }

    /// Retries every file currently in an error state (spec §4.H,
    /// `retryAll`).
    pub fn retry_all(self: &Arc<Self>) -> Result<BatchId> {
        let state = self.store.get_state();
        let failed: Vec<FileId> = state
            .files
            .iter()
            .filter(|(_, f)| f.error.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for file_id in &failed {
            self.reset_progress(file_id)?;
        }
        self.events.emit(Event::RetryAll(failed.clone()));
        self.mark_upload_started(&failed);
        let batch_id = BatchId(Uuid::new_v4().to_string());
        self.spawn_batch(batch_id.clone(), failed, Step::Created);
        Ok(batch_id)
    }

    /// Pauses every pausable file (spec §4.H, `pauseAll`).
    pub fn pause_all(&self) {
        let mut state = self.store.get_state();
        let mut changed = false;
        for file in state.files.values_mut() {
            if file.is_pausable() && !file.is_paused {
                file.is_paused = true;
                changed = true;
            }
        }
        if changed {
            self.store.set_state(StatePatch {
                files: Some(state.files),
                ..Default::default()
            });
        }
        self.events.emit(Event::PauseAll);
    }

    /// Resumes every paused file (spec §4.H, `resumeAll`).
    pub fn resume_all(&self) {
        let mut state = self.store.get_state();
        let mut changed = false;
        for file in state.files.values_mut() {
            if file.is_paused {
                file.is_paused = false;
                changed = true;
            }
        }
        if changed {
            self.store.set_state(StatePatch {
                files: Some(state.files),
                ..Default::default()
            });
        }
        self.events.emit(Event::ResumeAll);
    }

    /// Cancels one named batch, or every running batch when none is named
    /// (spec §4.H, `cancelUpload`/`cancelAll`).
    pub fn cancel_upload(&self, msg: CancelUpload) {
        match msg.batch_id {
            Some(batch_id) => {
                if let Some(handle) = self.running.lock().unwrap().remove(&batch_id) {
                    handle.abort();
                }
                let mut state = self.store.get_state();
                state.current_uploads.remove(&batch_id);
                self.store.set_state(StatePatch {
                    current_uploads: Some(state.current_uploads),
                    ..Default::default()
                });
            }
            None => self.cancel_all(),
        }
    }

    /// Aborts every running batch and leaves no scheduled work behind
    /// (spec §9, "cancelAll is residual-free").
    pub fn cancel_all(&self) {
        for (_, handle) in self.running.lock().unwrap().drain() {
            handle.abort();
        }
        self.auto_proceed_debounce.cancel();
        let mut state = self.store.get_state();
        state.current_uploads.clear();
        self.store.set_state(StatePatch {
            current_uploads: Some(state.current_uploads),
            ..Default::default()
        });
        self.events.emit(Event::CancelAll);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopUi;

    impl UiPlugin for NoopUi {
        fn id(&self) -> &str {
            "noop-ui"
        }
        fn render(&mut self, _state: &SessionState) {}
    }

    fn new_kernel() -> Arc<Kernel> {
        Kernel::new(Config::default(), None)
    }

    fn new_file(name: &str, bytes: &[u8]) -> NewFile {
        NewFile {
            source: "local".into(),
            name: Some(name.to_owned()),
            mime_type: None,
            last_modified: None,
            data: bytes.to_vec(),
            meta: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn add_file_then_remove_file_is_idempotent() {
        let kernel = new_kernel();
        let id = kernel.add_file(new_file("a.png", b"pixels")).unwrap();
        assert!(kernel.get_file(&id).is_some());

        kernel.remove_file(&id);
        kernel.remove_file(&id);
        assert!(kernel.get_file(&id).is_none());
    }

    #[tokio::test]
    async fn add_file_rejects_oversized_files_and_emits_restriction_failed() {
        let mut config = Config::default();
        config.restrictions.insert("max_file_size".into(), "1".into());
        let kernel = Kernel::new(config, None);

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        kernel.events.on("restriction-failed", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        let result = kernel.add_file(new_file("big.png", b"too many bytes"));
        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_plugin_ids_are_rejected() {
        let kernel = new_kernel();
        kernel.use_plugin(Plugin::Ui(Box::new(NoopUi))).await.unwrap();
        let err = kernel.use_plugin(Plugin::Ui(Box::new(NoopUi))).await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::PluginAlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn iterate_plugins_orders_by_kind_then_insertion() {
        let kernel = new_kernel();
        kernel.use_plugin(Plugin::Ui(Box::new(NoopUi))).await.unwrap();
        assert_eq!(kernel.iterate_plugins().await, vec!["noop-ui".to_owned()]);
    }

    #[tokio::test]
    async fn upload_with_no_eligible_files_still_completes() {
        let kernel = new_kernel();
        let batch_id = kernel.upload(StartUpload::default()).unwrap();
        // give the spawned batch task a chance to run to completion
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kernel.get_state().current_uploads.get(&batch_id).is_none());
    }

    #[tokio::test]
    async fn on_before_file_added_can_reject_a_file() {
        let kernel = new_kernel();
        kernel.on_before_file_added(|record, _files| {
            if record.name == "blocked.png" {
                Err("not allowed".to_owned())
            } else {
                Ok(())
            }
        });

        let err = kernel.add_file(new_file("blocked.png", b"x")).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::FileRejected { .. }));
        assert!(kernel.add_file(new_file("ok.png", b"x")).is_ok());
    }

    #[tokio::test]
    async fn on_before_upload_can_reject_a_batch() {
        let kernel = new_kernel();
        kernel.add_file(new_file("a.png", b"x")).unwrap();
        kernel.on_before_upload(|_files| Err("no uploads today".to_owned()));

        let err = kernel.upload(StartUpload::default()).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::UploadRejected { .. }));
    }

    #[tokio::test]
    async fn allow_multiple_uploads_false_blocks_concurrent_batches_until_the_first_finishes() {
        let mut config = Config::default();
        config.engine.allow_multiple_uploads = false;
        let kernel = Kernel::new(config, None);

        kernel.add_file(new_file("a.png", b"x")).unwrap();
        let first = kernel.upload(StartUpload::default()).unwrap();
        assert!(!kernel.get_state().allow_new_upload);

        kernel.add_file(new_file("b.png", b"y")).unwrap();
        let err = kernel.upload(StartUpload::default()).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::UploadNotAllowed));

        for _ in 0..200 {
            if kernel.get_state().allow_new_upload {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(kernel.get_state().allow_new_upload);
        assert!(kernel.get_state().current_uploads.get(&first).is_none());
    }
}
