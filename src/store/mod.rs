//! The reactive state store (spec §4.A): a single `SessionState`, mutated
//! only through `set_state`, which notifies subscribers with the previous
//! state, the next state, and the patch that produced it.
//!
//! Grounded on the `RwLock`-guarded shared map the teacher uses to hold
//! session state in `cache::Cache`, generalized from "one map" to "one
//! struct with a typed, partial patch".

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::types::{
    BatchId, BatchState, Capabilities, FileId, FileRecord, InfoMessage, SessionState,
};

/// A partial update to `SessionState`. Every field is `Option`; `None` means
/// "leave as-is". `info` is doubly-optional so a patch can distinguish
/// "don't touch the info message" from "clear the info message"
/// (spec §4.A, "patches are shallow-merged at the top level").
#[derive(Clone, Debug, Default)]
pub struct StatePatch {
    pub files: Option<HashMap<FileId, FileRecord>>,
    pub current_uploads: Option<HashMap<BatchId, BatchState>>,
    pub allow_new_upload: Option<bool>,
    pub capabilities: Option<Capabilities>,
    pub total_progress: Option<u8>,
    pub meta: Option<HashMap<String, Value>>,
    pub info: Option<Option<InfoMessage>>,
    pub plugins: Option<HashMap<String, Value>>,
}

impl StatePatch {
    fn apply(self, state: &mut SessionState) {
        if let Some(files) = self.files {
            state.files = files;
        }
        if let Some(current_uploads) = self.current_uploads {
            state.current_uploads = current_uploads;
        }
        if let Some(allow_new_upload) = self.allow_new_upload {
            state.allow_new_upload = allow_new_upload;
        }
        if let Some(capabilities) = self.capabilities {
            state.capabilities = capabilities;
        }
        if let Some(total_progress) = self.total_progress {
            state.total_progress = total_progress;
        }
        if let Some(meta) = self.meta {
            state.meta = meta;
        }
        if let Some(info) = self.info {
            state.info = info;
        }
        if let Some(plugins) = self.plugins {
            state.plugins = plugins;
        }
    }
}

type Listener = Box<dyn FnMut(&SessionState, &SessionState, &StatePatch) + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    listener: Listener,
}

/// Holds the single `SessionState` for a kernel instance. Cheap to clone
/// (wraps its interior in locks), so it can be shared across the actors that
/// make up the pipeline, uploaders, and progress aggregator.
pub struct Store {
    state: RwLock<SessionState>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            state: RwLock::new(SessionState::default()),
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the current state. Cloning rather than returning a guard
    /// keeps callers from holding the lock across other store calls.
    pub fn get_state(&self) -> SessionState {
        self.state.read().unwrap().clone()
    }

    /// Register a listener, called after every `set_state` with
    /// `(previous, next, patch)`. Returns an id usable with `unsubscribe`.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&SessionState, &SessionState, &StatePatch) + Send + 'static,
    {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = SubscriptionId(*next_id);
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            listener: Box::new(listener),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Shallow-merge `patch` into the current state and notify subscribers.
    /// Subscribers fire in registration order and see the same
    /// `(prev, next, patch)` triple (spec §4.A).
    pub fn set_state(&self, patch: StatePatch) {
        let prev = self.get_state();
        let mut next = prev.clone();
        patch.clone().apply(&mut next);
        *self.state.write().unwrap() = next.clone();

        let mut subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter_mut() {
            (subscriber.listener)(&prev, &next, &patch);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    #[test]
    fn set_state_merges_shallowly_and_notifies() {
        let store = Store::new();
        let seen = Arc::new(AtomicU8::new(0));
        let seen2 = seen.clone();
        store.subscribe(move |_prev, next, _patch| {
            seen2.store(next.total_progress, Ordering::SeqCst);
        });

        store.set_state(StatePatch {
            total_progress: Some(42),
            ..Default::default()
        });

        assert_eq!(store.get_state().total_progress, 42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        // fields not named in the patch are untouched
        assert!(store.get_state().allow_new_upload);
    }

    #[test]
    fn info_patch_can_clear_an_existing_message() {
        let store = Store::new();
        store.set_state(StatePatch {
            info: Some(Some(InfoMessage {
                is_hidden: false,
                kind: crate::types::InfoKind::Error,
                message: "oops".into(),
                details: None,
            })),
            ..Default::default()
        });
        assert!(store.get_state().info.is_some());

        store.set_state(StatePatch {
            info: Some(None),
            ..Default::default()
        });
        assert!(store.get_state().info.is_none());
    }

    #[test]
    fn unsubscribe_stops_further_notifications() {
        let store = Store::new();
        let calls = Arc::new(AtomicU8::new(0));
        let c = calls.clone();
        let id = store.subscribe(move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        store.unsubscribe(id);
        store.set_state(StatePatch {
            total_progress: Some(1),
            ..Default::default()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
