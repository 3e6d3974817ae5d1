//! Cache Statistics Module
//!
//! Tracks read hits and misses plus write and delete counts.

use serde::Serialize;

// == Cache Stats ==
/// Operation counters kept by the cache front.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live value
    pub hits: u64,
    /// Reads that fell back to the default
    pub misses: u64,
    /// Successful writes
    pub writes: u64,
    /// Successful deletes
    pub deletes: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
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

    pub fn record_writes(&mut self, count: u64) {
        self.writes += count;
    }

    pub fn record_deletes(&mut self, count: u64) {
        self.deletes += count;
    }
}
