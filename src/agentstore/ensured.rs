//! Process-local record of one-time work that has already succeeded.
//!
//! Index provisioning and lazy database creation sit on the hot write path and are
//! reached from many concurrent requests. [`EnsuredSet`] runs the work for a key once
//! and remembers the success, so the network round trip is paid once per process
//! lifetime. Each key owns a `tokio::sync::OnceCell`: callers that arrive while the
//! first one is still working wait for its outcome instead of repeating the call.
//! A failed attempt is not recorded, and the next waiter retries it.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Concurrency-safe "already done" set with single-flight initialisation.
#[derive(Debug)]
pub struct EnsuredSet<K: Eq + Hash> {
    cells: DashMap<K, Arc<OnceCell<()>>>,
}

impl<K: Eq + Hash> EnsuredSet<K> {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cells
            .get(key)
            .map_or(false, |cell| cell.initialized())
    }

    /// Run `work` unless `key` already succeeded.
    ///
    /// Concurrent callers for the same key share one run of `work`. Errors are
    /// returned to the caller whose attempt failed and are not cached.
    pub async fn ensure<F, Fut, E>(&self, key: K, work: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        // Clone the cell out so no shard lock is held across the await.
        let cell = Arc::clone(self.cells.entry(key).or_default().value());
        cell.get_or_try_init(work).await.map(|_| ())
    }

    /// Forget `key`, e.g. after the backing resource was found missing again.
    pub fn forget(&self, key: &K) {
        self.cells.remove(key);
    }

    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for EnsuredSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
