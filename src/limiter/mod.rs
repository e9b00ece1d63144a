//! Concurrency limiter (spec §5): bounds how many uploads run at once,
//! admitting waiters in FIFO order.
//!
//! The teacher bounds its worker pool with `futures_cpupool::CpuPool` sized
//! from `num_cpus::get()`; that pool type predates async/await and has no
//! notion of a dynamically adjustable, awaitable permit. `tokio::sync::
//! Semaphore` gives the same bounded-concurrency guarantee with fair FIFO
//! wakeup and composes directly with `async`/`.await`, so it stands in here.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds concurrent uploads to `capacity` at a time. Acquiring a permit
/// blocks (asynchronously) until a slot is free; permits are granted in the
/// order they were requested.
pub struct Limiter {
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Limiter {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Waits for a free slot, returning a guard that releases it on drop.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("limiter semaphore is never closed")
    }

    /// Changes how many uploads may run concurrently, taking effect for
    /// future `acquire` calls (spec §5, "the limit may change at runtime").
    pub fn resize(&self, capacity: usize) {
        let current = self.semaphore.available_permits();
        let target = capacity.max(1);
        if target > current {
            self.semaphore.add_permits(target - current);
        } else if target < current {
            self.semaphore.forget_permits(current - target);
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Clone for Limiter {
    fn clone(&self) -> Self {
        Limiter {
            semaphore: self.semaphore.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn only_capacity_many_permits_are_outstanding_at_once() {
        let limiter = Limiter::new(2);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 0);
        drop(p1);
        assert_eq!(limiter.available_permits(), 1);
        drop(p2);
    }

    #[tokio::test]
    async fn resize_grows_and_shrinks_capacity() {
        let limiter = Limiter::new(1);
        limiter.resize(3);
        assert_eq!(limiter.available_permits(), 3);
        limiter.resize(1);
        assert_eq!(limiter.available_permits(), 1);
    }
}
