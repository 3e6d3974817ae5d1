//! Memory Driver
//!
//! Process-local map from physical key to [`CacheEntry`] with lazy expiry.

use std::collections::HashMap;

use tracing::debug;

use crate::cache::{system_clock, CacheEntry, SharedClock};
use crate::drivers::CacheDriver;
use crate::error::Result;

// == Memory Driver ==
/// In-process storage.
///
/// The map has no internal synchronisation; wrap the owning cache in a lock
/// when several threads share it.
#[derive(Debug)]
pub struct MemoryDriver {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    clock: SharedClock,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    /// Returns the stored entry for a physical key, expired or not.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the live entry, removing it first if it has expired.
    fn live_entry(&mut self, key: &str) -> Option<&CacheEntry> {
        let now = self.clock.timestamp();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            debug!("Evicting expired key '{}'", key);
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key)
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live_entry(key).map(|entry| entry.value.clone()))
    }

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool> {
        let entry = CacheEntry::new(key, payload, ttl, self.clock.timestamp());
        self.entries.insert(key.to_string(), entry);
        Ok(true)
    }

    fn raw_delete(&mut self, key: &str) -> Result<bool> {
        self.entries.remove(key);
        Ok(true)
    }

    fn raw_exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).is_some())
    }

    fn raw_clear(&mut self, _scope: Option<&str>) -> Result<bool> {
        self.entries.clear();
        Ok(true)
    }
}
