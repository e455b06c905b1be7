//! Cache Entry Module
//!
//! A single cached origin response, keyed by normalized request URI.

use bytes::Bytes;

// == Cache Entry ==
/// A complete origin response stored verbatim.
///
/// Entries are immutable once inserted; a newer response for the same key
/// replaces the entry instead of mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Normalized request URI
    pub key: String,
    /// Status line, headers and body exactly as relayed
    pub payload: Bytes,
}

impl CacheEntry {
    pub fn new(key: String, payload: Bytes) -> Self {
        Self { key, payload }
    }

    /// Size charged against the cache budget.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
