//! Cache Module
//!
//! The driver-independent cache front: key validation and scoping, TTL
//! resolution, value encoding and the entry envelope.

mod base;
mod clock;
mod entry;
mod scope;
mod serializer;
mod stats;
mod value;


// Re-export public types
pub use base::{BaseCache, CacheConfig};
pub use clock::{system_clock, Clock, MockClock, SharedClock, SystemClock};
pub use entry::{CacheEntry, ENVELOPE_MAGIC};
pub use scope::{validate_key, KeyScoper};
pub use serializer::{Serializer, SerializerKind};
pub use stats::CacheStats;
pub use value::{Ttl, Value};

// == Public Constants ==
/// Characters that may not appear in a cache key
pub const RESERVED_KEY_CHARS: &str = "{}()/@:";
