//! Value and TTL arguments
//!
//! Sum types for "literal or lazy" values and for the accepted TTL forms.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{CacheError, Result};

// == Value ==
/// A value supplied either directly or as a zero-argument producer.
///
/// Lazy producers run at most once: for a default only on a miss, for a
/// written value just before it is encoded.
pub enum Value<T> {
    /// Ready-made value
    Literal(T),
    /// Producer invoked on demand
    Lazy(Box<dyn FnOnce() -> T + Send>),
}

impl<T> Value<T> {
    /// Wraps a producer.
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Value::Lazy(Box::new(f))
    }

    /// Produces the value, invoking the producer if needed.
    pub fn resolve(self) -> T {
        match self {
            Value::Literal(v) => v,
            Value::Lazy(f) => f(),
        }
    }
}

impl<T> From<T> for Value<T> {
    fn from(v: T) -> Self {
        Value::Literal(v)
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Value::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// Resolves a batch default at most once and hands out clones.
pub(crate) struct SharedDefault<T> {
    pending: Option<Value<T>>,
    resolved: Option<T>,
}

impl<T: Clone> SharedDefault<T> {
    pub(crate) fn new(value: Value<T>) -> Self {
        Self {
            pending: Some(value),
            resolved: None,
        }
    }

    pub(crate) fn get(&mut self) -> T {
        if let Some(pending) = self.pending.take() {
            self.resolved = Some(pending.resolve());
        }
        match &self.resolved {
            Some(v) => v.clone(),
            None => unreachable!("default resolved above"),
        }
    }
}

// == TTL ==
/// Time-to-live accepted by write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the configured `cache_expiry`, or never expire if it is 0
    #[default]
    Default,
    /// Exact seconds; 0 means never expire
    Seconds(u64),
    /// A span of time, converted to seconds against the current instant
    Duration(chrono::Duration),
}

impl Ttl {
    // == Resolve ==
    /// Resolves to seconds, `None` meaning the entry never expires.
    ///
    /// A duration is resolved by adding it to `now` and subtracting `now`
    /// again, so calendar arithmetic stays with chrono. A fractional second
    /// rounds up. Spans that cannot be expressed as a Unix timestamp offset
    /// are rejected.
    pub fn resolve(self, now: DateTime<Utc>, cache_expiry: u64) -> Result<Option<u64>> {
        match self {
            Ttl::Default if cache_expiry > 0 => checked_seconds(cache_expiry).map(Some),
            Ttl::Default | Ttl::Seconds(0) => Ok(None),
            Ttl::Seconds(secs) => checked_seconds(secs).map(Some),
            Ttl::Duration(span) => {
                let later = now.checked_add_signed(span).ok_or_else(|| {
                    CacheError::Validation(format!("TTL {span} is out of range"))
                })?;
                let span = later - now;
                if span < chrono::Duration::zero() {
                    return Err(CacheError::Validation(format!(
                        "TTL must not be negative, got {span}"
                    )));
                }
                let whole = span.num_seconds();
                let secs = if span > chrono::Duration::seconds(whole) {
                    whole + 1
                } else {
                    whole
                };
                Ok((secs > 0).then_some(secs.unsigned_abs()))
            }
        }
    }
}

/// Accepts second counts that fit a signed Unix timestamp offset.
fn checked_seconds(secs: u64) -> Result<u64> {
    i64::try_from(secs)
        .map(|_| secs)
        .map_err(|_| CacheError::Validation(format!("TTL of {secs}s is out of range")))
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::Seconds(secs)
    }
}

impl From<Option<u64>> for Ttl {
    fn from(secs: Option<u64>) -> Self {
        secs.map_or(Ttl::Default, Ttl::Seconds)
    }
}

impl From<std::time::Duration> for Ttl {
    fn from(d: std::time::Duration) -> Self {
        chrono::Duration::from_std(d).map_or(Ttl::Seconds(d.as_secs()), Ttl::Duration)
    }
}

impl From<chrono::Duration> for Ttl {
    fn from(d: chrono::Duration) -> Self {
        Ttl::Duration(d)
    }
}
