//! In-flight fetch registry for request coalescing.
//!
//! A worker that misses the cache takes the per-key fetch lock before
//! contacting the origin. Concurrent misses on the same key queue on that
//! lock and re-check the cache once it is released, so a popular URI
//! reaches the origin once instead of once per waiting client. A queued
//! worker that still misses after waiting releases the lock straight away
//! and fetches on its own; only uncontended holders fetch under the lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key fetch locks, shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct InflightFetches {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InflightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive right to fetch `key`.
    ///
    /// Returns immediately when nobody else is fetching the key.
    pub async fn acquire(&self, key: &str) -> FetchGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (guard, waited) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (lock.lock_owned().await, true),
        };
        FetchGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            waited,
            _guard: guard,
        }
    }

    /// Number of keys with a fetch in progress or queued.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive right to fetch one key. Released on drop.
#[derive(Debug)]
pub struct FetchGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    waited: bool,
    _guard: OwnedMutexGuard<()>,
}

impl FetchGuard {
    /// True if another fetch of the same key held the lock first.
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        // Map + this guard hold two references; more means someone is queued.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
