//! Cache Statistics Module
//!
//! Tracks cache activity: hits, misses, insertions, evictions and rejections.

// == Cache Stats ==
/// Snapshot of cache counters and occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Successful inserts (including replacements)
    pub insertions: u64,
    /// Entries removed from the tail to make room
    pub evictions: u64,
    /// Inserts refused because the payload was too large
    pub rejected: u64,
    /// Current number of entries
    pub entries: usize,
    /// Current sum of payload sizes in bytes
    pub total_bytes: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_insertion(&mut self) {
        self.insertions += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    /// Updates the occupancy figures.
    pub fn set_occupancy(&mut self, entries: usize, total_bytes: usize) {
        self.entries = entries;
        self.total_bytes = total_bytes;
    }
}
