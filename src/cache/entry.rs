//! Cache Entry Module
//!
//! Defines the value envelope shared by the drivers that manage expiry
//! themselves, and its binary on-disk form.

use bytes::{Buf, BufMut};

use crate::error::{CacheError, Result};

/// Leading bytes of every on-disk envelope.
pub const ENVELOPE_MAGIC: &[u8; 4] = b"PCE1";

// == Cache Entry ==
/// Represents a single stored value with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Creation timestamp (Unix seconds)
    pub created: i64,
    /// Physical (scoped) key
    pub key: String,
    /// Encoded payload
    pub value: Vec<u8>,
    /// TTL in seconds, None = no expiration
    pub ttl: Option<u64>,
    /// Expiration timestamp (Unix seconds), None = no expiration
    pub expires: Option<i64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped at `now`.
    ///
    /// A TTL of 0 is normalised to `None` so that `expires` is absent
    /// exactly when the entry never expires.
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Option<u64>, now: i64) -> Self {
        let ttl = ttl.filter(|secs| *secs > 0);
        let expires = ttl.map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)));

        Self {
            created: now,
            key: key.into(),
            value,
            ttl,
            expires,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once the current time is
    /// greater than or equal to the expiration time.
    pub fn is_expired(&self, now: i64) -> bool {
        match self.expires {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Envelope Encoding ==
    /// Serialises the entry into the length-prefixed binary envelope.
    ///
    /// Layout (big-endian): magic, created i64, ttl flag u8 + u64,
    /// expires flag u8 + i64, key length u32 + bytes, value length u32 + bytes.
    pub fn to_envelope(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 8 + 9 + 9 + 8 + self.key.len() + self.value.len());
        buf.put_slice(ENVELOPE_MAGIC);
        buf.put_i64(self.created);
        buf.put_u8(u8::from(self.ttl.is_some()));
        buf.put_u64(self.ttl.unwrap_or_default());
        buf.put_u8(u8::from(self.expires.is_some()));
        buf.put_i64(self.expires.unwrap_or_default());
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(self.key.as_bytes());
        buf.put_u32(self.value.len() as u32);
        buf.put_slice(&self.value);
        buf
    }

    /// Parses an envelope, rejecting truncated or foreign data.
    pub fn from_envelope(mut data: &[u8]) -> Result<Self> {
        let incomplete =
            |what: &str| CacheError::Serialization(format!("incomplete entry: {what}"));

        if data.remaining() < 4 || &data[..4] != ENVELOPE_MAGIC {
            return Err(incomplete("bad magic"));
        }
        data.advance(4);

        if data.remaining() < 8 + 9 + 9 {
            return Err(incomplete("truncated header"));
        }
        let created = data.get_i64();
        let has_ttl = data.get_u8() == 1;
        let ttl = data.get_u64();
        let has_expires = data.get_u8() == 1;
        let expires = data.get_i64();

        let key = take_block(&mut data).ok_or_else(|| incomplete("truncated key"))?;
        let key = String::from_utf8(key).map_err(|_| incomplete("key is not UTF-8"))?;
        let value = take_block(&mut data).ok_or_else(|| incomplete("truncated value"))?;
        if data.has_remaining() {
            return Err(incomplete("trailing bytes"));
        }

        Ok(Self {
            created,
            key,
            value,
            ttl: has_ttl.then_some(ttl),
            expires: has_expires.then_some(expires),
        })
    }
}

fn take_block(data: &mut &[u8]) -> Option<Vec<u8>> {
    if data.remaining() < 4 {
        return None;
    }
    let len = data.get_u32() as usize;
    if data.remaining() < len {
        return None;
    }
    let block = data[..len].to_vec();
    data.advance(len);
    Some(block)
}
