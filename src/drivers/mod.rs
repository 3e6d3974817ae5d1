//! Drivers Module
//!
//! Storage backends behind the cache contract. Drivers only see physical
//! (scoped) keys, encoded payloads and resolved TTLs; validation, scoping,
//! defaults and serialization live in [`crate::cache::BaseCache`].

#[cfg(unix)]
mod file;
mod memcached;
mod memory;
mod redis;

#[cfg(unix)]
pub use file::{FileDriver, FileDriverOptions};
pub use memcached::{MemcacheClient, MemcachedClient, MemcachedDriver};
pub use memory::MemoryDriver;
pub use redis::{RedisClient, RedisDriver};

#[cfg(test)]
pub(crate) use memcached::tests::FakeMemcached;
#[cfg(test)]
pub(crate) use redis::tests::FakeRedis;

use crate::error::Result;

// == Server Config ==
/// Bootstrap settings for a remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address
    pub server: String,
    pub port: u16,
    /// Relative weight; servers with weight 0 are skipped
    pub weight: u32,
    /// Backend specific options, passed through as query parameters
    pub options: Vec<(String, String)>,
}

impl ServerConfig {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            weight: 1,
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `host:port` form used for raw socket connections.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

// == Cache Driver ==
/// Storage primitives implemented by every backend.
///
/// `ttl` is already resolved: `None` means the value never expires.
pub trait CacheDriver: Send {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the payload, or `None` on a miss or an expired entry.
    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool>;

    fn raw_delete(&mut self, key: &str) -> Result<bool>;

    /// Existence check; never touches the value.
    fn raw_exists(&mut self, key: &str) -> Result<bool>;

    /// Removes entries; with a scope, backends that can enumerate keys
    /// restrict removal to that scope.
    fn raw_clear(&mut self, scope: Option<&str>) -> Result<bool>;

    /// Batch read in request order. Defaults to one `raw_get` per key.
    fn raw_get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.raw_get(key)).collect()
    }

    /// Batch write. Defaults to one `raw_set` per key; not atomic.
    fn raw_set_many(&mut self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<bool> {
        let mut all = true;
        for (key, payload) in items {
            all &= self.raw_set(&key, payload, ttl)?;
        }
        Ok(all)
    }

    /// Batch delete. Defaults to one `raw_delete` per key.
    fn raw_delete_many(&mut self, keys: &[String]) -> Result<bool> {
        let mut all = true;
        for key in keys {
            all &= self.raw_delete(key)?;
        }
        Ok(all)
    }
}

impl<D: CacheDriver + ?Sized> CacheDriver for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).raw_get(key)
    }

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool> {
        (**self).raw_set(key, payload, ttl)
    }

    fn raw_delete(&mut self, key: &str) -> Result<bool> {
        (**self).raw_delete(key)
    }

    fn raw_exists(&mut self, key: &str) -> Result<bool> {
        (**self).raw_exists(key)
    }

    fn raw_clear(&mut self, scope: Option<&str>) -> Result<bool> {
        (**self).raw_clear(scope)
    }

    fn raw_get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).raw_get_many(keys)
    }

    fn raw_set_many(&mut self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<bool> {
        (**self).raw_set_many(items, ttl)
    }

    fn raw_delete_many(&mut self, keys: &[String]) -> Result<bool> {
        (**self).raw_delete_many(keys)
    }
}
