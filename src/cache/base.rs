//! Base Cache Module
//!
//! The uniform cache contract. Every driver goes through the same key
//! validation, scoping, TTL resolution, default handling and serialization.

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::scope::validate_key;
use crate::cache::value::SharedDefault;
use crate::cache::{
    system_clock, CacheStats, KeyScoper, Serializer, SerializerKind, SharedClock, Ttl, Value,
};
use crate::drivers::CacheDriver;
use crate::error::{CacheError, Result};

// == Cache Config ==
/// Settings shared by every driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Default TTL in seconds for writes that omit one; 0 = never expire
    pub cache_expiry: u64,
    /// Namespace prefix applied to every key
    pub scope: String,
    /// Value encoding
    pub serializer: SerializerKind,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_expiry(mut self, secs: u64) -> Self {
        self.cache_expiry = secs;
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn serializer(mut self, kind: SerializerKind) -> Self {
        self.serializer = kind;
        self
    }
}

// == Base Cache ==
/// Cache front composed over a [`CacheDriver`].
pub struct BaseCache<D: CacheDriver> {
    driver: D,
    scoper: KeyScoper,
    serializer: Serializer,
    cache_expiry: u64,
    clock: SharedClock,
    stats: CacheStats,
}

impl<D: CacheDriver> BaseCache<D> {
    pub fn new(driver: D, config: CacheConfig) -> Self {
        Self::with_clock(driver, config, system_clock())
    }

    /// Uses `clock` for resolving duration TTLs.
    pub fn with_clock(driver: D, config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            driver,
            scoper: KeyScoper::new(config.scope),
            serializer: Serializer::new(config.serializer),
            cache_expiry: config.cache_expiry,
            clock,
            stats: CacheStats::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn scoper(&self) -> &KeyScoper {
        &self.scoper
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Validates a key and maps it to its physical form.
    fn physical_key(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(self.scoper.apply(key))
    }

    fn physical_keys<I, K>(&self, keys: I) -> Result<(Vec<String>, Vec<String>)>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut originals = Vec::new();
        let mut physical = Vec::new();
        for key in keys {
            let key = key.as_ref();
            physical.push(self.physical_key(key)?);
            originals.push(key.to_string());
        }
        Ok((originals, physical))
    }

    fn resolve_ttl(&self, ttl: Ttl) -> Result<Option<u64>> {
        ttl.resolve(self.clock.now(), self.cache_expiry)
    }

    // == Get ==
    /// Returns the stored value, or the default on a miss.
    ///
    /// A lazy default runs only on a miss. A stored value that cannot be
    /// decoded is a serialization fault, not a miss.
    pub fn get<T>(&mut self, key: &str, default: impl Into<Value<T>>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let physical = self.physical_key(key)?;
        let payload = self
            .driver
            .raw_get(&physical)
            .map_err(|e| CacheError::wrap("get", e))?;

        match payload {
            Some(bytes) => {
                let value = self
                    .serializer
                    .decode(&bytes)
                    .map_err(|e| CacheError::wrap("get", e))?;
                self.stats.record_hit();
                debug!("Cache hit for key '{}' on {}", physical, self.driver.name());
                Ok(value)
            }
            None => {
                self.stats.record_miss();
                debug!("Cache miss for key '{}' on {}", physical, self.driver.name());
                Ok(default.into().resolve())
            }
        }
    }

    // == Set ==
    /// Stores a value; a lazy value is produced just before encoding.
    pub fn set<T>(
        &mut self,
        key: &str,
        value: impl Into<Value<T>>,
        ttl: impl Into<Ttl>,
    ) -> Result<bool>
    where
        T: Serialize,
    {
        let physical = self.physical_key(key)?;
        let ttl = self.resolve_ttl(ttl.into())?;
        let value = value.into().resolve();
        let payload = self
            .serializer
            .encode(&value)
            .map_err(|e| CacheError::wrap("set", e))?;

        let stored = self
            .driver
            .raw_set(&physical, payload, ttl)
            .map_err(|e| CacheError::wrap("set", e))?;
        if stored {
            self.stats.record_writes(1);
        }
        debug!("Stored key '{}' with TTL {:?}", physical, ttl);
        Ok(stored)
    }

    // == Delete ==
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let physical = self.physical_key(key)?;
        let deleted = self
            .driver
            .raw_delete(&physical)
            .map_err(|e| CacheError::wrap("delete", e))?;
        if deleted {
            self.stats.record_deletes(1);
        }
        Ok(deleted)
    }

    // == Has ==
    /// Checks for a live entry under the scoped key without decoding it.
    pub fn has(&mut self, key: &str) -> Result<bool> {
        let physical = self.physical_key(key)?;
        self.driver
            .raw_exists(&physical)
            .map_err(|e| CacheError::wrap("has", e))
    }

    // == Clear ==
    /// Best-effort wipe; faults are logged and reported as `false`.
    pub fn clear(&mut self) -> bool {
        let scope = self.scoper.scope().map(str::to_string);
        match self.driver.raw_clear(scope.as_deref()) {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!("Clearing {} cache failed: {}", self.driver.name(), e);
                false
            }
        }
    }

    // == Get Multiple ==
    /// Reads several keys, returned in request order under their original
    /// names.
    ///
    /// An item that fails to decode degrades to the default; the rest of
    /// the batch is unaffected.
    pub fn get_multiple<T, I, K>(
        &mut self,
        keys: I,
        default: impl Into<Value<T>>,
    ) -> Result<Vec<(String, T)>>
    where
        T: DeserializeOwned + Clone,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let (originals, physical) = self.physical_keys(keys)?;
        let payloads = self
            .driver
            .raw_get_many(&physical)
            .map_err(|e| CacheError::wrap("get_multiple", e))?;

        let mut default = SharedDefault::new(default.into());
        let mut values = Vec::with_capacity(originals.len());
        for (key, payload) in originals.into_iter().zip(payloads) {
            let value = match payload {
                Some(bytes) => match self.serializer.decode(&bytes) {
                    Ok(value) => {
                        self.stats.record_hit();
                        value
                    }
                    Err(e) => {
                        warn!("Undecodable value for key '{}', using default: {}", key, e);
                        self.stats.record_miss();
                        default.get()
                    }
                },
                None => {
                    self.stats.record_miss();
                    default.get()
                }
            };
            values.push((key, value));
        }
        Ok(values)
    }

    // == Set Multiple ==
    /// Writes several values with one shared TTL.
    pub fn set_multiple<T, I, K>(&mut self, items: I, ttl: impl Into<Ttl>) -> Result<bool>
    where
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
        K: AsRef<str>,
    {
        let ttl = self.resolve_ttl(ttl.into())?;
        let mut encoded = Vec::new();
        for (key, value) in items {
            let physical = self.physical_key(key.as_ref())?;
            let payload = self
                .serializer
                .encode(&value)
                .map_err(|e| CacheError::wrap("set_multiple", e))?;
            encoded.push((physical, payload));
        }

        let count = encoded.len() as u64;
        let stored = self
            .driver
            .raw_set_many(encoded, ttl)
            .map_err(|e| CacheError::wrap("set_multiple", e))?;
        if stored {
            self.stats.record_writes(count);
        }
        Ok(stored)
    }

    // == Delete Multiple ==
    pub fn delete_multiple<I, K>(&mut self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let (_, physical) = self.physical_keys(keys)?;
        let deleted = self
            .driver
            .raw_delete_many(&physical)
            .map_err(|e| CacheError::wrap("delete_multiple", e))?;
        if deleted {
            self.stats.record_deletes(physical.len() as u64);
        }
        Ok(deleted)
    }
}
