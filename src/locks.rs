//! Named locks for handler code
//!
//! Handlers run concurrently, including several invocations of the same
//! handler. Code touching shared plugin state serializes itself by name
//! instead of managing its own mutexes:
//!
//! ```ignore
//! bot.synchronize("counter", || async {
//!     // only one "counter" block runs at a time
//! })
//! .await;
//! ```

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily populated table of one mutex per name
#[derive(Debug, Default)]
pub struct NamedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the lock for `name`, creating it on first use
    fn resolve(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(name) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Acquire the lock for `name`; released when the guard drops
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.resolve(name).lock_owned().await
    }

    /// Run `body` while holding the lock for `name`
    pub async fn synchronize<F, Fut, T>(&self, name: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(name).await;
        body().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_name_serializes() {
        let locks = Arc::new(NamedLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                locks
                    .synchronize("counter", || async {
                        // read-modify-write with a yield in between
                        let value = counter.load(Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        counter.store(value + 1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_contend() {
        let locks = NamedLocks::new();
        let _held = locks.lock("a").await;

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            locks.synchronize("b", || async { 42 }),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_same_name_blocks_while_held() {
        let locks = NamedLocks::new();
        let held = locks.lock("a").await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.lock("a")).await;
        assert!(blocked.is_err());

        drop(held);
        let _again = locks.lock("a").await;
    }
}
