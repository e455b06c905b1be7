//! Thread-safe cache handle shared by all connection workers.
//!
//! The store's index, recency list and size counter change together on
//! every lookup and insert, so one mutex guards the whole store. Critical
//! sections are short and never span an await point.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::cache::inflight::{FetchGuard, InflightFetches};
use crate::cache::store::InsertOutcome;
use crate::cache::{CacheStats, CacheStore};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Cloneable handle to the process-wide response cache.
#[derive(Debug, Clone)]
pub struct SharedCache {
    store: Arc<Mutex<CacheStore>>,
    inflight: InflightFetches,
}

impl SharedCache {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            inflight: InflightFetches::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(CacheStore::new(config.max_cache_size, config.max_object_size))
    }

    /// Look up `key`, promoting it on a hit.
    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        let hit = self.lock().lookup(key);
        metrics::record_cache_lookup(hit.is_some());
        hit
    }

    /// Offer a fetched response for caching.
    pub fn insert(&self, key: String, payload: Bytes) -> InsertOutcome {
        let (outcome, entries, bytes) = {
            let mut store = self.lock();
            let outcome = store.insert(key, payload);
            (outcome, store.len(), store.total_size())
        };

        match outcome {
            InsertOutcome::Stored { evicted } | InsertOutcome::Replaced { evicted } => {
                metrics::record_cache_evictions(evicted);
                metrics::record_cache_size(entries, bytes);
            }
            InsertOutcome::Rejected => {}
        }
        outcome
    }

    pub fn max_object_size(&self) -> usize {
        self.lock().max_object_size()
    }

    /// Wait for the exclusive right to fetch `key` from its origin.
    pub async fn begin_fetch(&self, key: &str) -> FetchGuard {
        self.inflight.acquire(key).await
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock()
            .keys_by_recency()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    // A panicking worker never leaves the store half-updated: no store method
    // can panic between its paired index and list updates.
    fn lock(&self) -> MutexGuard<'_, CacheStore> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
