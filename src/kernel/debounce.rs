//! Cancellable trailing-edge debounce (spec §9 REDESIGN FLAGS: auto-proceed
//! and render scheduling go through an explicit, cancellable debounce
//! primitive rather than a raw deferred callback).

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debounce {
    delay: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Debounce {
            delay,
            handle: Mutex::new(None),
        }
    }

    /// Schedules `callback` to run after the configured delay, canceling any
    /// call still pending from an earlier `trigger`. Only the last trigger
    /// within a window actually runs.
    pub fn trigger<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut handle = self.handle.lock().unwrap();
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        let delay = self.delay;
        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }

    /// Cancels a pending call, if any (spec §9, `cancelAll` must leave no
    /// residual scheduled work behind).
    pub fn cancel(&self) {
        if let Some(previous) = self.handle.lock().unwrap().take() {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn only_the_last_trigger_within_the_window_fires() {
        let debounce = Debounce::new(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let c = count.clone();
            debounce.trigger(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_suppresses_a_pending_call() {
        let debounce = Debounce::new(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        debounce.trigger(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        debounce.cancel();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
