//! Redis Driver
//!
//! Delegates expiry to the server. Generic over [`RedisClient`], which is
//! implemented for a blocking `redis::Connection`.

use std::collections::HashSet;

use tracing::debug;

use crate::drivers::{CacheDriver, ServerConfig};
use crate::error::{CacheError, Result};

const SCAN_BATCH: usize = 500;

// == Client Trait ==
/// The subset of Redis commands the driver needs.
///
/// `get` reports a nil reply as `Ok(None)`; every other error is a fault.
pub trait RedisClient: Send {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
    fn set(&mut self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()>;
    fn mset(&mut self, items: &[(String, Vec<u8>)]) -> Result<()>;
    /// Returns the number of keys removed.
    fn del(&mut self, keys: &[String]) -> Result<u64>;
    fn exists(&mut self, key: &str) -> Result<bool>;
    fn scan_match(&mut self, pattern: &str) -> Result<Vec<String>>;
    fn flush_db(&mut self) -> Result<()>;
}

fn backend(e: ::redis::RedisError) -> CacheError {
    CacheError::Backend(format!("redis: {e}"))
}

impl RedisClient for ::redis::Connection {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        ::redis::cmd("GET").arg(key).query(self).map_err(backend)
    }

    fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        ::redis::cmd("MGET").arg(keys).query(self).map_err(backend)
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(secs) = ttl {
            cmd.arg("EX").arg(secs);
        }
        cmd.query(self).map_err(backend)
    }

    fn mset(&mut self, items: &[(String, Vec<u8>)]) -> Result<()> {
        let mut cmd = ::redis::cmd("MSET");
        for (key, value) in items {
            cmd.arg(key).arg(value.as_slice());
        }
        cmd.query(self).map_err(backend)
    }

    fn del(&mut self, keys: &[String]) -> Result<u64> {
        ::redis::cmd("DEL").arg(keys).query(self).map_err(backend)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        let count: u64 = ::redis::cmd("EXISTS").arg(key).query(self).map_err(backend)?;
        Ok(count > 0)
    }

    fn scan_match(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query(self)
                .map_err(backend)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    fn flush_db(&mut self) -> Result<()> {
        ::redis::cmd("FLUSHDB").query(self).map_err(backend)
    }
}

/// Connection URL for bootstrap settings; `db` and `password` come from
/// the options.
pub(crate) fn redis_url(server: &ServerConfig) -> String {
    let auth = server
        .option("password")
        .map(|p| format!(":{}@", urlencoding::encode(p)))
        .unwrap_or_default();
    let db = server.option("db").unwrap_or("0");
    format!("redis://{}{}:{}/{}", auth, server.server, server.port, db)
}

/// Escapes glob metacharacters so a scope matches literally.
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// == Redis Driver ==
/// Remote driver with native expiry.
pub struct RedisDriver<C: RedisClient = ::redis::Connection> {
    client: C,
}

impl RedisDriver<::redis::Connection> {
    /// Opens a blocking connection from bootstrap settings.
    pub fn connect(server: &ServerConfig) -> Result<Self> {
        let client = ::redis::Client::open(redis_url(server)).map_err(backend)?;
        let conn = client.get_connection().map_err(backend)?;
        Ok(Self::new(conn))
    }
}

impl<C: RedisClient> RedisDriver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

impl<C: RedisClient> CacheDriver for RedisDriver<C> {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.client.get(key)
    }

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool> {
        self.client.set(key, &payload, ttl)?;
        Ok(true)
    }

    fn raw_delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.client.del(&[key.to_string()])? > 0)
    }

    fn raw_exists(&mut self, key: &str) -> Result<bool> {
        self.client.exists(key)
    }

    fn raw_clear(&mut self, scope: Option<&str>) -> Result<bool> {
        let Some(scope) = scope else {
            self.client.flush_db()?;
            return Ok(true);
        };

        let keys = self.client.scan_match(&format!("{}*", escape_glob(scope)))?;
        debug!("Clearing {} redis keys in scope '{}'", keys.len(), scope);
        if !keys.is_empty() {
            self.client.del(&keys)?;
        }
        Ok(true)
    }

    fn raw_get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.client.mget(keys)?;
        if values.len() != keys.len() {
            return Err(CacheError::Backend(format!(
                "redis: MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    fn raw_set_many(&mut self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        if ttl.is_some() {
            // MSET takes no expiry; set each key so every TTL is honoured.
            for (key, payload) in &items {
                self.client.set(key, payload, ttl)?;
            }
            return Ok(true);
        }
        self.client.mset(&items)?;
        Ok(true)
    }

    fn raw_delete_many(&mut self, keys: &[String]) -> Result<bool> {
        let distinct: HashSet<&String> = keys.iter().collect();
        if distinct.is_empty() {
            return Ok(true);
        }
        let deleted = self.client.del(keys)?;
        Ok(deleted == distinct.len() as u64)
    }
}
