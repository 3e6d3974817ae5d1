//! Polycache - one cache contract over interchangeable storage drivers
//!
//! Memory, file, memcached and redis drivers share key validation, scoping,
//! TTL resolution and serialization through [`cache::BaseCache`].

pub mod api;
pub mod cache;
pub mod config;
pub mod drivers;
pub mod error;
pub mod models;

pub use api::AppState;
pub use cache::{BaseCache, CacheConfig, SerializerKind, Ttl, Value};
pub use config::{Config, DriverKind, DynCache};
pub use error::CacheError;
