//! Pipeline coordinator (spec §4.H): runs one batch through
//! preprocessors -> an uploader -> postprocessors, persisting the step it
//! last reached so a batch can be resumed after a process restart
//! (an explicit addition beyond the original browser-session-only restore;
//! see `DESIGN.md`).
//!
//! Grounded on the teacher's `agent::worker` step sequencing and its
//! `database::Database` snapshotting, generalized from "one fixed upload
//! flow" to "whatever preprocessor/uploader/postprocessor plugins are
//! installed, run in (type, insertion) order".

mod error;

pub use self::error::{Error, ErrorKind, Result};

use crate::database::Database;
use crate::events::{Event, EventBus};
use crate::kernel::plugin::{Plugin, PluginKind};
use crate::store::{Store, StatePatch};
use crate::types::{BatchId, BatchResult, BatchState, FileId};

/// Which stage a batch last completed, persisted alongside its file list so
/// a restart can pick up where it left off (spec §4.H, "resumable batch
/// steps").
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(usize)]
pub enum Step {
    Created = 0,
    Preprocessed = 1,
    Uploaded = 2,
    Postprocessed = 3,
    Complete = 4,
}

impl Step {
    fn from_usize(n: usize) -> Step {
        match n {
            0 => Step::Created,
            1 => Step::Preprocessed,
            2 => Step::Uploaded,
            3 => Step::Postprocessed,
            _ => Step::Complete,
        }
    }
}

/// Drives a single batch end to end. Stateless aside from the optional
/// persistence handle: everything it acts on (store, event bus, plugin
/// list) is borrowed per call from the kernel that owns them.
pub struct Coordinator {
    database: Option<Database>,
}

impl Coordinator {
    pub fn new(database: Option<Database>) -> Self {
        Coordinator { database }
    }

    /// Batches persisted from a previous run that never reached
    /// `Step::Complete` (spec §4.H, restore on startup).
    pub fn recoverable_batches(&self) -> Result<Vec<(BatchId, Vec<FileId>, Step)>> {
        let database = match &self.database {
            Some(db) => db,
            None => return Ok(Vec::new()),
        };
        let mut recovered = Vec::new();
        for persisted in database
            .get_all_batches()
            .map_err(|e| ErrorKind::PersistFailed {
                id: "*".into(),
                message: e.to_string(),
            })?
        {
            let file_ids: Vec<FileId> = serde_json::from_str(&persisted.state_json)
                .unwrap_or_default();
            recovered.push((persisted.batch_id, file_ids, Step::from_usize(persisted.step)));
        }
        Ok(recovered)
    }

    fn persist(&self, batch_id: &BatchId, step: Step, file_ids: &[FileId]) -> Result<()> {
        if let Some(database) = &self.database {
            let state_json = serde_json::to_string(file_ids).unwrap_or_else(|_| "[]".into());
            database
                .upsert_batch(batch_id, step as usize, &state_json)
                .map_err(|e| ErrorKind::PersistFailed {
                    id: batch_id.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn forget(&self, batch_id: &BatchId) {
        if let Some(database) = &self.database {
            let _ = database.delete_batch(batch_id);
        }
    }

    /// Runs `file_ids` through every installed preprocessor, then the first
    /// installed uploader, then every postprocessor, persisting after each
    /// stage. `resume_from` lets a batch recovered mid-flight skip the
    /// stages it already completed in a prior process (spec §4.H,
    /// "walks stage functions in order, skipping any whose index is below
    /// the persisted step"). Returns the batch's final successful/failed
    /// split.
    pub async fn run_batch(
        &self,
        batch_id: &BatchId,
        file_ids: Vec<FileId>,
        plugins: &[Plugin],
        store: &Store,
        events: &EventBus,
        resume_from: Step,
    ) -> Result<BatchResult> {
        store.set_state(StatePatch {
            current_uploads: Some({
                let mut uploads = store.get_state().current_uploads;
                let mut batch_state = BatchState::new(file_ids.clone());
                batch_state.step = resume_from as usize;
                uploads.insert(batch_id.clone(), batch_state);
                uploads
            }),
            ..Default::default()
        });
        if resume_from == Step::Created {
            events.emit(Event::Upload {
                id: batch_id.clone(),
                file_ids: file_ids.clone(),
            });
            self.persist(batch_id, Step::Created, &file_ids)?;
        }

        let outcome = self.run_stages(batch_id, &file_ids, plugins, store, events, resume_from).await;

        // The batch's bookkeeping is cleared whether the run succeeded or
        // failed: a failed batch is not left orphaned in `current_uploads`.
        let mut state = store.get_state();
        state.current_uploads.remove(batch_id);
        store.set_state(StatePatch {
            current_uploads: Some(state.current_uploads),
            ..Default::default()
        });
        self.forget(batch_id);

        if let Ok(result) = &outcome {
            events.emit(Event::Complete(result.clone()));
        }
        outcome
    }

    async fn run_stages(
        &self,
        batch_id: &BatchId,
        file_ids: &[FileId],
        plugins: &[Plugin],
        store: &Store,
        events: &EventBus,
        resume_from: Step,
    ) -> Result<BatchResult> {
        if resume_from < Step::Preprocessed {
            for plugin in plugins.iter().filter(|p| p.kind() == PluginKind::Preprocessor) {
                if let Plugin::Preprocessor(preprocessor) = plugin {
                    preprocessor
                        .process(file_ids, store)
                        .await
                        .map_err(|e| ErrorKind::PreprocessorFailed {
                            plugin_id: preprocessor.id().to_owned(),
                            message: e.to_string(),
                        })?;
                }
            }
            self.persist(batch_id, Step::Preprocessed, file_ids)?;
        }

        if resume_from < Step::Uploaded {
            for file_id in file_ids {
                events.emit(Event::UploadStarted(file_id.clone()));
            }
            let uploader = plugins
                .iter()
                .find(|p| p.kind() == PluginKind::Uploader)
                .ok_or_else(Error::no_uploader_configured)?;
            if let Plugin::Uploader(uploader) = uploader {
                uploader
                    .upload(file_ids, store, events)
                    .await
                    .map_err(|e| ErrorKind::UploaderFailed {
                        plugin_id: uploader.id().to_owned(),
                        message: e.to_string(),
                    })?;
            }
            self.persist(batch_id, Step::Uploaded, file_ids)?;
        }

        if resume_from < Step::Postprocessed {
            for plugin in plugins.iter().filter(|p| p.kind() == PluginKind::Postprocessor) {
                if let Plugin::Postprocessor(postprocessor) = plugin {
                    postprocessor
                        .process(file_ids, store)
                        .await
                        .map_err(|e| ErrorKind::PostprocessorFailed {
                            plugin_id: postprocessor.id().to_owned(),
                            message: e.to_string(),
                        })?;
                }
            }
            self.persist(batch_id, Step::Postprocessed, file_ids)?;
        }

        let state = store.get_state();
        let successful: Vec<FileId> = file_ids
            .iter()
            .filter(|id| state.files.get(id).map(|f| f.error.is_none()).unwrap_or(false))
            .cloned()
            .collect();
        let failed: Vec<FileId> = file_ids
            .iter()
            .filter(|id| !successful.contains(id))
            .cloned()
            .collect();
        Ok(BatchResult {
            successful,
            failed,
            upload_id: batch_id.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kernel::plugin::Uploader as UploaderTrait;
    use crate::store::StatePatch;
    use crate::types::{FileProgress, FileRecord};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct EchoUploader;

    #[async_trait]
    impl UploaderTrait for EchoUploader {
        fn id(&self) -> &str {
            "echo"
        }

        async fn upload(
            &self,
            file_ids: &[FileId],
            store: &Store,
            _events: &EventBus,
        ) -> crate::Result<()> {
            let mut state = store.get_state();
            for id in file_ids {
                if let Some(file) = state.files.get_mut(id) {
                    file.progress.upload_complete = true;
                }
            }
            store.set_state(StatePatch {
                files: Some(state.files),
                ..Default::default()
            });
            Ok(())
        }
    }

    fn file(id: &str) -> FileRecord {
        FileRecord {
            id: id.into(),
            source: "local".into(),
            name: id.to_owned(),
            extension: None,
            mime_type: "application/octet-stream".into(),
            data: Default::default(),
            size: Some(10),
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

    #[tokio::test]
    async fn runs_a_batch_through_the_installed_uploader() {
        let store = Store::new();
        let events = EventBus::new();
        let mut state = store.get_state();
        state.files.insert("a".into(), file("a"));
        store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });

        let plugins = vec![Plugin::Uploader(Box::new(EchoUploader))];
        let coordinator = Coordinator::new(None);
        let result = coordinator
            .run_batch(
                &BatchId("b1".into()),
                vec![FileId::from("a")],
                &plugins,
                &store,
                &events,
                Step::Created,
            )
            .await
            .unwrap();

        assert_eq!(result.successful, vec![FileId::from("a")]);
        assert!(result.failed.is_empty());
        assert!(store.get_state().current_uploads.is_empty());
    }

    #[tokio::test]
    async fn fails_without_an_installed_uploader() {
        let store = Store::new();
        let events = EventBus::new();
        let coordinator = Coordinator::new(None);
        let err = coordinator
            .run_batch(&BatchId("b1".into()), vec![], &[], &store, &events, Step::Created)
            .await
            .unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::NoUploaderConfigured);
    }

    #[tokio::test]
    async fn resuming_past_uploaded_skips_the_uploader_entirely() {
        let store = Store::new();
        let events = EventBus::new();
        let mut state = store.get_state();
        let mut f = file("a");
        f.progress.upload_complete = true;
        state.files.insert("a".into(), f);
        store.set_state(StatePatch {
            files: Some(state.files),
            ..Default::default()
        });

        // No uploader installed at all: if `run_stages` tried to run the
        // upload stage this would fail with `NoUploaderConfigured`.
        let coordinator = Coordinator::new(None);
        let result = coordinator
            .run_batch(
                &BatchId("b1".into()),
                vec![FileId::from("a")],
                &[],
                &store,
                &events,
                Step::Uploaded,
            )
            .await
            .unwrap();

        assert_eq!(result.successful, vec![FileId::from("a")]);
    }
}
