//! Memcached Driver
//!
//! Delegates expiry to the server. The driver is generic over
//! [`MemcachedClient`] so a pre-connected handle or a test double can be
//! injected; [`MemcacheClient`] wraps the `memcache` crate.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use memcache::MemcacheError;
use tracing::{debug, warn};

use crate::cache::{system_clock, SharedClock};
use crate::drivers::{CacheDriver, ServerConfig};
use crate::error::{CacheError, Result};

/// Longest expiration memcached reads as relative seconds; anything larger
/// is taken as an absolute Unix timestamp.
pub const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

const DUMP_TIMEOUT: Duration = Duration::from_secs(5);

// == Client Trait ==
/// The subset of memcached commands the driver needs.
///
/// `get` must report a miss as `Ok(None)`; every other error is a fault.
pub trait MemcachedClient: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn get_multi(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8], expiration: u32) -> Result<()>;
    /// Stores several values without expiration.
    fn set_multi(&self, items: &[(&str, &[u8])]) -> Result<()>;
    /// Returns false when the key did not exist.
    fn delete(&self, key: &str) -> Result<bool>;
    /// Enumerates every key currently held by the servers.
    fn keys(&self) -> Result<Vec<String>>;
    fn flush(&self) -> Result<()>;
}

fn backend(e: MemcacheError) -> CacheError {
    CacheError::Backend(format!("memcached: {e}"))
}

// == Memcache Client ==
/// [`MemcachedClient`] over `memcache::Client`.
pub struct MemcacheClient {
    client: memcache::Client,
    /// `host:port` of every server, for key enumeration
    addresses: Vec<String>,
}

impl MemcacheClient {
    /// Connects to every server with a positive weight.
    pub fn connect(servers: &[ServerConfig]) -> Result<Self> {
        let active: Vec<&ServerConfig> = servers.iter().filter(|s| s.weight > 0).collect();
        if active.is_empty() {
            return Err(CacheError::Validation(
                "no memcached server with a positive weight".to_string(),
            ));
        }

        let urls: Vec<String> = active.iter().map(|s| memcache_url(s)).collect();
        let client = memcache::Client::connect(urls).map_err(backend)?;

        Ok(Self::from_client(
            client,
            active.iter().map(|s| s.address()).collect(),
        ))
    }

    /// Wraps an already connected client.
    pub fn from_client(client: memcache::Client, addresses: Vec<String>) -> Self {
        Self { client, addresses }
    }
}

fn memcache_url(server: &ServerConfig) -> String {
    let mut url = format!("memcache://{}:{}", server.server, server.port);
    for (i, (name, value)) in server.options.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(&urlencoding::encode(name));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

impl MemcachedClient for MemcacheClient {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.client.get::<Vec<u8>>(key).map_err(backend)
    }

    fn get_multi(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        self.client.gets::<Vec<u8>>(keys).map_err(backend)
    }

    fn set(&self, key: &str, value: &[u8], expiration: u32) -> Result<()> {
        self.client.set(key, value, expiration).map_err(backend)
    }

    fn set_multi(&self, items: &[(&str, &[u8])]) -> Result<()> {
        // The first failing key aborts the batch.
        for (key, value) in items {
            self.client.set(key, *value, 0).map_err(backend)?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.client.delete(key).map_err(backend)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for address in &self.addresses {
            keys.extend(dump_keys(address)?);
        }
        Ok(keys)
    }

    fn flush(&self) -> Result<()> {
        self.client.flush().map_err(backend)
    }
}

/// Lists keys with `lru_crawler metadump all` over a plain text connection.
fn dump_keys(address: &str) -> Result<Vec<String>> {
    let io_fault = |e: std::io::Error| CacheError::Backend(format!("memcached {address}: {e}"));

    let mut stream = TcpStream::connect(address).map_err(io_fault)?;
    stream.set_read_timeout(Some(DUMP_TIMEOUT)).map_err(io_fault)?;
    stream
        .write_all(b"lru_crawler metadump all\r\n")
        .map_err(io_fault)?;

    let mut keys = Vec::new();
    for line in BufReader::new(stream).lines() {
        let line = line.map_err(io_fault)?;
        let line = line.trim_end();
        if line == "END" {
            return Ok(keys);
        }
        if line.starts_with("ERROR")
            || line.starts_with("CLIENT_ERROR")
            || line.starts_with("SERVER_ERROR")
            || line.starts_with("BUSY")
        {
            return Err(CacheError::Backend(format!("memcached {address}: {line}")));
        }
        if let Some(raw) = parse_dump_key(line) {
            let key = urlencoding::decode(raw)
                .map_err(|e| CacheError::Backend(format!("memcached {address}: {e}")))?;
            keys.push(key.into_owned());
        }
    }
    Err(CacheError::Backend(format!(
        "memcached {address}: key dump ended early"
    )))
}

fn parse_dump_key(line: &str) -> Option<&str> {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("key="))
}

// == Memcached Driver ==
/// Remote driver with native expiry.
pub struct MemcachedDriver<C: MemcachedClient = MemcacheClient> {
    client: C,
    clock: SharedClock,
}

impl MemcachedDriver<MemcacheClient> {
    /// Connects from bootstrap settings.
    pub fn connect(servers: &[ServerConfig]) -> Result<Self> {
        Ok(Self::new(MemcacheClient::connect(servers)?))
    }
}

impl<C: MemcachedClient> MemcachedDriver<C> {
    pub fn new(client: C) -> Self {
        Self::with_clock(client, system_clock())
    }

    pub fn with_clock(client: C, clock: SharedClock) -> Self {
        Self { client, clock }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Memcached expiration value for a resolved TTL.
    fn expiration(&self, ttl: Option<u64>) -> Result<u32> {
        match ttl {
            None => Ok(0),
            Some(secs) if secs <= MAX_RELATIVE_EXPIRATION => Ok(secs as u32),
            Some(secs) => {
                let offset = i64::try_from(secs).unwrap_or(i64::MAX);
                let at = self.clock.timestamp().saturating_add(offset);
                u32::try_from(at).map_err(|_| {
                    CacheError::Validation(format!("TTL of {secs}s is beyond memcached's range"))
                })
            }
        }
    }
}

impl<C: MemcachedClient> CacheDriver for MemcachedDriver<C> {
    fn name(&self) -> &'static str {
        "memcached"
    }

    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.client.get(key)
    }

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool> {
        let expiration = self.expiration(ttl)?;
        self.client.set(key, &payload, expiration)?;
        Ok(true)
    }

    fn raw_delete(&mut self, key: &str) -> Result<bool> {
        self.client.delete(key)
    }

    fn raw_exists(&mut self, key: &str) -> Result<bool> {
        // The Option is the out-of-band result code: a stored empty or
        // false-ish payload is still Some.
        Ok(self.client.get(key)?.is_some())
    }

    fn raw_clear(&mut self, scope: Option<&str>) -> Result<bool> {
        let Some(scope) = scope else {
            self.client.flush()?;
            return Ok(true);
        };

        let keys: Vec<String> = self
            .client
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(scope))
            .collect();
        debug!("Clearing {} memcached keys in scope '{}'", keys.len(), scope);
        for key in &keys {
            if !self.client.delete(key)? {
                debug!("Key '{}' vanished before it could be cleared", key);
            }
        }
        Ok(true)
    }

    fn raw_get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let found = self.client.get_multi(&refs)?;
        Ok(keys.iter().map(|key| found.get(key).cloned()).collect())
    }

    fn raw_set_many(&mut self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<bool> {
        if ttl.is_some() {
            // The multi-set carries no expiration.
            let expiration = self.expiration(ttl)?;
            for (key, payload) in &items {
                self.client.set(key, payload, expiration)?;
            }
            return Ok(true);
        }
        let refs: Vec<(&str, &[u8])> = items
            .iter()
            .map(|(key, payload)| (key.as_str(), payload.as_slice()))
            .collect();
        self.client.set_multi(&refs)?;
        Ok(true)
    }

    fn raw_delete_many(&mut self, keys: &[String]) -> Result<bool> {
        let mut seen = HashSet::new();
        let mut all = true;
        for key in keys.iter().filter(|key| seen.insert(key.as_str())) {
            if !self.client.delete(key)? {
                warn!("memcached did not delete '{}'", key);
                all = false;
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::{Clock, MockClock};
    use std::cell::{Cell, RefCell};
    use std::sync::Arc;

    /// In-memory memcached with native expiry against a mock clock.
    pub(crate) struct FakeMemcached {
        clock: MockClock,
        items: RefCell<HashMap<String, (Vec<u8>, u32)>>,
        pub(crate) round_trips: Cell<usize>,
        pub(crate) single_sets: Cell<usize>,
        pub(crate) fail_with: RefCell<Option<String>>,
    }

    impl FakeMemcached {
        pub(crate) fn new(clock: MockClock) -> Self {
            Self {
                clock,
                items: RefCell::new(HashMap::new()),
                round_trips: Cell::new(0),
                single_sets: Cell::new(0),
                fail_with: RefCell::new(None),
            }
        }

        pub(crate) fn expiration_of(&self, key: &str) -> Option<u32> {
            self.items.borrow().get(key).map(|(_, exp)| *exp)
        }

        pub(crate) fn insert_raw(&self, key: &str, value: &[u8]) {
            self.items
                .borrow_mut()
                .insert(key.to_string(), (value.to_vec(), 0));
        }

        fn call(&self) -> Result<()> {
            self.round_trips.set(self.round_trips.get() + 1);
            match self.fail_with.borrow().as_ref() {
                Some(msg) => Err(CacheError::Backend(msg.clone())),
                None => Ok(()),
            }
        }

        fn live(&self, key: &str) -> Option<Vec<u8>> {
            let now = self.clock.timestamp();
            let items = self.items.borrow();
            let (value, exp) = items.get(key)?;
            let deadline = match *exp as i64 {
                0 => None,
                e if e as u64 <= MAX_RELATIVE_EXPIRATION => None,
                e => Some(e),
            };
            match deadline {
                Some(at) if now >= at => None,
                _ => Some(value.clone()),
            }
        }
    }

    impl MemcachedClient for FakeMemcached {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.call()?;
            Ok(self.live(key))
        }

        fn get_multi(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
            self.call()?;
            Ok(keys
                .iter()
                .filter_map(|k| self.live(k).map(|v| (k.to_string(), v)))
                .collect())
        }

        fn set(&self, key: &str, value: &[u8], expiration: u32) -> Result<()> {
            self.call()?;
            self.single_sets.set(self.single_sets.get() + 1);
            // Store relative expirations as absolute deadlines.
            let exp = if expiration > 0 && u64::from(expiration) <= MAX_RELATIVE_EXPIRATION {
                (self.clock.timestamp() + i64::from(expiration)) as u32
            } else {
                expiration
            };
            self.items
                .borrow_mut()
                .insert(key.to_string(), (value.to_vec(), exp));
            Ok(())
        }

        fn set_multi(&self, items: &[(&str, &[u8])]) -> Result<()> {
            self.call()?;
            let mut map = self.items.borrow_mut();
            for (key, value) in items {
                map.insert(key.to_string(), (value.to_vec(), 0));
            }
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<bool> {
            self.call()?;
            let present = self.live(key).is_some();
            self.items.borrow_mut().remove(key);
            Ok(present)
        }

        fn keys(&self) -> Result<Vec<String>> {
            self.call()?;
            Ok(self.items.borrow().keys().cloned().collect())
        }

        fn flush(&self) -> Result<()> {
            self.call()?;
            self.items.borrow_mut().clear();
            Ok(())
        }
    }

    fn driver() -> (MemcachedDriver<FakeMemcached>, MockClock) {
        let clock = MockClock::default();
        let fake = FakeMemcached::new(clock.clone());
        (
            MemcachedDriver::with_clock(fake, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_url_includes_options() {
        let server = ServerConfig::new("mc.local", 11211)
            .with_option("timeout", "2")
            .with_option("protocol", "ascii");
        assert_eq!(
            memcache_url(&server),
            "memcache://mc.local:11211?timeout=2&protocol=ascii"
        );
    }

    #[test]
    fn test_parse_dump_key() {
        let line = "key=app%3Ax exp=-1 la=1700000000 cas=7 fetch=no cls=1 size=63";
        assert_eq!(parse_dump_key(line), Some("app%3Ax"));
        assert_eq!(parse_dump_key("garbage"), None);
    }

    #[test]
    fn test_connect_requires_weighted_server() {
        let mut server = ServerConfig::new("127.0.0.1", 11211);
        server.weight = 0;
        assert!(matches!(
            MemcachedDriver::connect(&[server]),
            Err(CacheError::Validation(_))
        ));
    }

    #[test]
    fn test_set_get_and_native_expiry() {
        let (mut driver, clock) = driver();
        driver.raw_set("k", b"v".to_vec(), Some(10)).unwrap();
        assert_eq!(driver.raw_get("k").unwrap(), Some(b"v".to_vec()));

        clock.advance(10);

        assert_eq!(driver.raw_get("k").unwrap(), None);
        assert!(!driver.raw_exists("k").unwrap());
    }

    #[test]
    fn test_long_ttl_becomes_absolute_timestamp() {
        let (mut driver, clock) = driver();
        let ttl = MAX_RELATIVE_EXPIRATION + 1;
        driver.raw_set("k", b"v".to_vec(), Some(ttl)).unwrap();
        assert_eq!(
            driver.client().expiration_of("k"),
            Some((clock.timestamp() + ttl as i64) as u32)
        );
    }

    #[test]
    fn test_exists_sees_empty_payload() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("k", b"");
        assert!(driver.raw_exists("k").unwrap());
    }

    #[test]
    fn test_backend_fault_is_not_a_miss() {
        let (mut driver, _) = driver();
        *driver.client().fail_with.borrow_mut() = Some("SERVER_ERROR out of memory".into());
        assert!(matches!(driver.raw_get("k"), Err(CacheError::Backend(_))));
    }

    #[test]
    fn test_get_many_is_one_round_trip_in_order() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("b", b"2");
        driver.client().insert_raw("a", b"1");
        let before = driver.client().round_trips.get();

        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let values = driver.raw_get_many(&keys).unwrap();

        assert_eq!(driver.client().round_trips.get() - before, 1);
        assert_eq!(
            values,
            vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]
        );
    }

    #[test]
    fn test_set_many_with_ttl_loops_single_sets() {
        let (mut driver, _) = driver();
        let items = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];
        driver.raw_set_many(items.clone(), Some(30)).unwrap();
        assert_eq!(driver.client().single_sets.get(), 2);

        driver.raw_set_many(items, None).unwrap();
        assert_eq!(driver.client().single_sets.get(), 2);
    }

    #[test]
    fn test_delete_many_fails_on_partial_delete() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("a", b"1");
        let keys = vec!["a".to_string(), "missing".to_string()];
        assert!(!driver.raw_delete_many(&keys).unwrap());
    }

    #[test]
    fn test_delete_many_ignores_repeated_keys() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("a", b"1");
        let keys = vec!["a".to_string(), "a".to_string()];
        assert!(driver.raw_delete_many(&keys).unwrap());
        assert_eq!(driver.raw_get("a").unwrap(), None);
    }

    #[test]
    fn test_oversized_ttl_is_rejected_not_wrapped() {
        let (mut driver, _) = driver();
        let result = driver.raw_set("k", b"v".to_vec(), Some(u64::MAX));
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }

    #[test]
    fn test_scoped_clear_keeps_other_scopes() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("app:a", b"1");
        driver.client().insert_raw("app:b", b"2");
        driver.client().insert_raw("other:a", b"3");

        assert!(driver.raw_clear(Some("app:")).unwrap());

        assert_eq!(driver.raw_get("app:a").unwrap(), None);
        assert_eq!(driver.raw_get("other:a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_unscoped_clear_flushes() {
        let (mut driver, _) = driver();
        driver.client().insert_raw("x", b"1");
        assert!(driver.raw_clear(None).unwrap());
        assert_eq!(driver.raw_get("x").unwrap(), None);
    }
}
