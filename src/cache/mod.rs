//! Cache Module
//!
//! Bounded, recency-ordered store of complete origin responses keyed by
//! normalized request URI, plus the shared handle and fetch coalescing
//! used by connection workers.

mod entry;
mod inflight;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use inflight::{FetchGuard, InflightFetches};
pub use shared::SharedCache;
pub use stats::CacheStats;
pub use store::{CacheStore, InsertOutcome};
