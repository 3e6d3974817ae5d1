//! Key Scoping Module
//!
//! Key validation and namespace-prefix handling.

use crate::cache::RESERVED_KEY_CHARS;
use crate::error::{CacheError, Result};

// == Validate Key ==
/// Rejects empty keys and keys containing any reserved character.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::Validation("key must not be empty".to_string()));
    }
    if let Some(c) = key.chars().find(|c| RESERVED_KEY_CHARS.contains(*c)) {
        return Err(CacheError::Validation(format!(
            "key '{key}' contains reserved character '{c}'"
        )));
    }
    Ok(())
}

// == Key Scoper ==
/// Applies and strips a namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScoper {
    prefix: String,
}

impl KeyScoper {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix; empty when unscoped.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The prefix, or `None` when no scope is configured.
    pub fn scope(&self) -> Option<&str> {
        (!self.prefix.is_empty()).then_some(self.prefix.as_str())
    }

    // == Apply ==
    /// Maps a key to its physical key.
    ///
    /// An existing prefix is stripped before re-prepending, so applying the
    /// scope to an already scoped key is a no-op.
    pub fn apply(&self, key: &str) -> String {
        let bare = self.strip(key);
        let mut physical = String::with_capacity(self.prefix.len() + bare.len());
        physical.push_str(&self.prefix);
        physical.push_str(bare);
        physical
    }

    // == Strip ==
    /// Removes the prefix from a physical key, if present.
    pub fn strip<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}
