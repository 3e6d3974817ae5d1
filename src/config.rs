//! Configuration Module
//!
//! Handles loading server and cache configuration from environment variables
//! and building the configured cache.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::cache::{BaseCache, CacheConfig, SerializerKind};
use crate::drivers::{CacheDriver, MemcachedDriver, MemoryDriver, RedisDriver, ServerConfig};
use crate::error::{CacheError, Result};

/// Cache type served by the binary; the driver is picked at runtime.
pub type DynCache = BaseCache<Box<dyn CacheDriver>>;

// == Driver Kind ==
/// Storage backend selected by `CACHE_DRIVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    #[default]
    Memory,
    File,
    Memcached,
    Redis,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Memory => "memory",
            DriverKind::File => "file",
            DriverKind::Memcached => "memcached",
            DriverKind::Redis => "redis",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(DriverKind::Memory),
            "file" => Ok(DriverKind::File),
            "memcached" | "memcache" => Ok(DriverKind::Memcached),
            "redis" => Ok(DriverKind::Redis),
            other => Err(CacheError::Validation(format!("unknown cache driver '{other}'"))),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend
    pub driver: DriverKind,
    /// Default TTL in seconds for writes without one; 0 = never expire
    pub cache_expiry: u64,
    /// Key prefix applied to every key
    pub scope: String,
    /// Value encoding
    pub serializer: SerializerKind,
    /// Root directory of the file driver
    pub file_dir: PathBuf,
    /// Shadow decoded file entries in memory
    pub file_warm: bool,
    /// Memcached bootstrap server
    pub memcached: ServerConfig,
    /// Redis bootstrap server
    pub redis: ServerConfig,
    /// HTTP server port
    pub server_port: u16,
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DRIVER` - memory, file, memcached or redis (default: memory)
    /// - `CACHE_EXPIRY` - Default TTL in seconds (default: 0)
    /// - `CACHE_SCOPE` - Key prefix (default: empty)
    /// - `CACHE_SERIALIZER` - none, json or serialize (default: json)
    /// - `CACHE_FILE_DIR` - File driver root (default: `<tmp>/polycache`)
    /// - `CACHE_FILE_WARM` - Enable the file driver's warm map (default: false)
    /// - `MEMCACHED_SERVER` / `MEMCACHED_PORT` / `MEMCACHED_WEIGHT`
    /// - `REDIS_SERVER` / `REDIS_PORT` / `REDIS_DB`
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut memcached = ServerConfig::new(
            env_string("MEMCACHED_SERVER", &defaults.memcached.server),
            env_parse("MEMCACHED_PORT", defaults.memcached.port),
        );
        memcached.weight = env_parse("MEMCACHED_WEIGHT", defaults.memcached.weight);

        let redis = ServerConfig::new(
            env_string("REDIS_SERVER", &defaults.redis.server),
            env_parse("REDIS_PORT", defaults.redis.port),
        )
        .with_option("db", env_parse("REDIS_DB", 0u32).to_string());

        Self {
            driver: env_parse("CACHE_DRIVER", defaults.driver),
            cache_expiry: env_parse("CACHE_EXPIRY", defaults.cache_expiry),
            scope: env_string("CACHE_SCOPE", &defaults.scope),
            serializer: env_parse("CACHE_SERIALIZER", defaults.serializer),
            file_dir: env::var_os("CACHE_FILE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_dir),
            file_warm: env_parse("CACHE_FILE_WARM", defaults.file_warm),
            memcached,
            redis,
            server_port: env_parse("SERVER_PORT", defaults.server_port),
        }
    }

    /// Settings handed to the cache front.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .cache_expiry(self.cache_expiry)
            .scope(self.scope.clone())
            .serializer(self.serializer)
    }

    // == Build Cache ==
    /// Connects the configured driver and wraps it in a [`BaseCache`].
    pub fn build_cache(&self) -> Result<DynCache> {
        let driver: Box<dyn CacheDriver> = match self.driver {
            DriverKind::Memory => Box::new(MemoryDriver::new()),
            DriverKind::File => self.file_driver()?,
            DriverKind::Memcached => {
                Box::new(MemcachedDriver::connect(std::slice::from_ref(&self.memcached))?)
            }
            DriverKind::Redis => Box::new(RedisDriver::connect(&self.redis)?),
        };
        Ok(BaseCache::new(driver, self.cache_config()))
    }

    #[cfg(unix)]
    fn file_driver(&self) -> Result<Box<dyn CacheDriver>> {
        use crate::drivers::{FileDriver, FileDriverOptions};

        let options = FileDriverOptions::new(&self.file_dir)
            .cache_expiry(self.cache_expiry)
            .warm(self.file_warm);
        Ok(Box::new(FileDriver::new(options)))
    }

    #[cfg(not(unix))]
    fn file_driver(&self) -> Result<Box<dyn CacheDriver>> {
        Err(CacheError::Validation(
            "the file driver needs flock and is only available on unix".to_string(),
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DriverKind::Memory,
            cache_expiry: 0,
            scope: String::new(),
            // HTTP bodies are JSON documents
            serializer: SerializerKind::Json,
            file_dir: env::temp_dir().join("polycache"),
            file_warm: false,
            memcached: ServerConfig::new("127.0.0.1", 11211),
            redis: ServerConfig::new("127.0.0.1", 6379),
            server_port: 3000,
        }
    }
}
