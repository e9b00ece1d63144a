//! End-to-end coverage of the `addFile -> upload -> complete` flow through
//! the public `Kernel` surface, the way a caller outside this crate would
//! exercise it: no internal module is reached into directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use conveyor::config::Config;
use conveyor::events::{Event, EventBus};
use conveyor::kernel::plugin::{Plugin, Postprocessor, Preprocessor, Uploader as UploaderTrait};
use conveyor::messages::{CancelUpload, NewFile, StartUpload};
use conveyor::store::{Store, StatePatch};
use conveyor::types::FileId;
use conveyor::Kernel;

struct RecordingUploader {
    uploaded: Arc<Mutex<Vec<FileId>>>,
}

#[async_trait]
impl UploaderTrait for RecordingUploader {
    fn id(&self) -> &str {
        "test-uploader"
    }

    async fn upload(&self, file_ids: &[FileId], store: &Store, events: &EventBus) -> conveyor::Result<()> {
        for id in file_ids {
            let size = store.get_state().files.get(id).and_then(|f| f.size);
            events.emit(Event::UploadProgress {
                file_id: id.clone(),
                uploader: self.id().to_string(),
                bytes_uploaded: size.unwrap_or(0),
                bytes_total: size,
            });
        }
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

struct CountingPreprocessor {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Preprocessor for CountingPreprocessor {
    fn id(&self) -> &str {
        "counting-preprocessor"
    }

    async fn process(&self, _file_ids: &[FileId], _store: &Store) -> conveyor::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingPostprocessor {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Postprocessor for CountingPostprocessor {
    fn id(&self) -> &str {
        "counting-postprocessor"
    }

    async fn process(&self, _file_ids: &[FileId], _store: &Store) -> conveyor::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_until_idle(kernel: &Arc<Kernel>) {
    for _ in 0..200 {
        if kernel.get_state().current_uploads.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch never finished");
}

#[tokio::test]
async fn add_file_then_upload_runs_the_full_pipeline() {
    let kernel = Kernel::new(Config::default(), None);

    let uploaded = Arc::new(Mutex::new(Vec::new()));
    let pre_calls = Arc::new(AtomicUsize::new(0));
    let post_calls = Arc::new(AtomicUsize::new(0));

    kernel
        .use_plugin(Plugin::Preprocessor(Box::new(CountingPreprocessor {
            calls: pre_calls.clone(),
        })))
        .await
        .unwrap();
    kernel
        .use_plugin(Plugin::Uploader(Box::new(RecordingUploader {
            uploaded: uploaded.clone(),
        })))
        .await
        .unwrap();
    kernel
        .use_plugin(Plugin::Postprocessor(Box::new(CountingPostprocessor {
            calls: post_calls.clone(),
        })))
        .await
        .unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    kernel.events.on("complete", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let id = kernel
        .add_file(NewFile {
            source: "local".into(),
            name: Some("photo.png".into()),
            mime_type: None,
            last_modified: None,
            data: b"pretend-image-bytes".to_vec(),
            meta: HashMap::new(),
        })
        .unwrap();

    kernel.upload(StartUpload::default()).unwrap();
    wait_until_idle(&kernel).await;

    assert_eq!(pre_calls.load(Ordering::SeqCst), 1);
    assert_eq!(post_calls.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(*uploaded.lock().unwrap(), vec![id.clone()]);

    let file = kernel.get_file(&id).unwrap();
    assert!(file.progress.upload_complete);
    assert_eq!(file.progress.percentage, 100);
}

#[tokio::test]
async fn cancel_upload_removes_the_batch_from_current_uploads() {
    struct StallForever;

    #[async_trait]
    impl UploaderTrait for StallForever {
        fn id(&self) -> &str {
            "stall-forever"
        }

        async fn upload(&self, _file_ids: &[FileId], _store: &Store, _events: &EventBus) -> conveyor::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    let kernel = Kernel::new(Config::default(), None);
    kernel
        .use_plugin(Plugin::Uploader(Box::new(StallForever)))
        .await
        .unwrap();

    kernel
        .add_file(NewFile {
            source: "local".into(),
            name: Some("slow.bin".into()),
            mime_type: None,
            last_modified: None,
            data: b"x".to_vec(),
            meta: HashMap::new(),
        })
        .unwrap();

    let batch_id = kernel.upload(StartUpload::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(kernel.get_state().current_uploads.contains_key(&batch_id));

    kernel.cancel_upload(CancelUpload {
        batch_id: Some(batch_id.clone()),
    });

    assert!(!kernel.get_state().current_uploads.contains_key(&batch_id));
}
