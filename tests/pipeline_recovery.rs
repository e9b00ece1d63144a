//! Coverage for resuming a batch that was persisted by a prior process and
//! never reached `Step::Complete` -- the crash-recovery path `Kernel::new`
//! wires up via `Coordinator::recoverable_batches`, exercised here without
//! reaching into the pipeline module directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use conveyor::config::Config;
use conveyor::database::{Database, Source};
use conveyor::events::EventBus;
use conveyor::kernel::plugin::{Plugin, Uploader as UploaderTrait};
use conveyor::messages::NewFile;
use conveyor::store::{Store, StatePatch};
use conveyor::types::{BatchId, FileId};
use conveyor::Kernel;

struct RecordingUploader {
    uploaded: Arc<Mutex<Vec<FileId>>>,
}

#[async_trait]
impl UploaderTrait for RecordingUploader {
    fn id(&self) -> &str {
        "recovery-test-uploader"
    }

    async fn upload(&self, file_ids: &[FileId], store: &Store, _events: &EventBus) -> conveyor::Result<()> {
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
        self.uploaded.lock().unwrap().extend_from_slice(file_ids);
        Ok(())
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn recover_batches_resubmits_a_batch_left_behind_by_a_prior_process() {
    let db = Database::new(&Source::Memory).unwrap();

    let kernel = Kernel::new(Config::default(), Some(db.clone()));
    let uploaded = Arc::new(Mutex::new(Vec::new()));
    kernel
        .use_plugin(Plugin::Uploader(Box::new(RecordingUploader {
            uploaded: uploaded.clone(),
        })))
        .await
        .unwrap();

    let file_id = kernel
        .add_file(NewFile {
            source: "local".into(),
            name: Some("resumed.bin".into()),
            mime_type: None,
            last_modified: None,
            data: b"leftover-bytes".to_vec(),
            meta: HashMap::new(),
        })
        .unwrap();

    // Simulate a process that started a batch, persisted its `Created`
    // snapshot, and was killed before the run finished (and so before
    // `Coordinator::forget` ever ran).
    let stale_batch = BatchId("stale-batch".into());
    let state_json = serde_json::to_string(&vec![file_id.clone()]).unwrap();
    db.upsert_batch(&stale_batch, 0, &state_json).unwrap();

    assert_eq!(db.get_all_batches().unwrap().len(), 1);

    kernel.recover_batches().unwrap();
    wait_until(|| !uploaded.lock().unwrap().is_empty()).await;

    assert_eq!(*uploaded.lock().unwrap(), vec![file_id.clone()]);
    let file = kernel.get_file(&file_id).unwrap();
    assert!(file.progress.upload_complete);

    // The recovered batch runs to completion and is forgotten again.
    wait_until(|| db.get_all_batches().unwrap().is_empty()).await;
}

#[tokio::test]
async fn recover_batches_is_a_no_op_without_a_database() {
    let kernel = Kernel::new(Config::default(), None);
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    kernel
        .use_plugin(Plugin::Uploader(Box::new(RecordingUploader {
            uploaded: Arc::new(Mutex::new(Vec::new())),
        })))
        .await
        .unwrap();
    kernel.events.on("upload", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    kernel.recover_batches().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
