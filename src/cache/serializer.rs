//! Serializer Module
//!
//! Encode/decode strategies applied to every value before it reaches a driver.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CacheError, Result};

// == Serializer Kind ==
/// Encoding applied to stored values.
///
/// Switching kinds leaves existing entries undecodable; no migration is
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    /// Text pass-through for strings and scalars
    #[default]
    None,
    /// JSON, non-ASCII text kept as UTF-8
    Json,
    /// Self-describing MessagePack; any serde value round-trips
    Native,
}

impl SerializerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializerKind::None => "none",
            SerializerKind::Json => "json",
            SerializerKind::Native => "serialize",
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializerKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(SerializerKind::None),
            "json" => Ok(SerializerKind::Json),
            "serialize" | "native" => Ok(SerializerKind::Native),
            other => Err(CacheError::Validation(format!(
                "unknown serializer '{other}'"
            ))),
        }
    }
}

// == Serializer ==
/// Encodes values to bytes and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    kind: SerializerKind,
}

impl Serializer {
    pub fn new(kind: SerializerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SerializerKind {
        self.kind
    }

    // == Encode ==
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.kind {
            SerializerKind::None => encode_text(value),
            SerializerKind::Json => {
                serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            SerializerKind::Native => rmp_serde::to_vec_named(value)
                .map_err(|e| CacheError::Serialization(e.to_string())),
        }
    }

    // == Decode ==
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.kind {
            SerializerKind::None => decode_text(bytes),
            SerializerKind::Json => {
                serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            SerializerKind::Native => {
                rmp_serde::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }
}

fn encode_text<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    match json {
        JsonValue::String(s) => Ok(s.into_bytes()),
        JsonValue::Number(n) => Ok(n.to_string().into_bytes()),
        JsonValue::Bool(b) => Ok(b.to_string().into_bytes()),
        other => Err(CacheError::Serialization(format!(
            "pass-through serializer only stores strings and scalars, got {}",
            json_type(&other)
        ))),
    }
}

fn decode_text<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CacheError::Serialization(format!("stored value is not UTF-8: {e}")))?;
    if let Ok(v) = serde_json::from_value(JsonValue::String(text.to_string())) {
        return Ok(v);
    }
    let scalar: JsonValue =
        serde_json::from_str(text).map_err(|e| CacheError::Serialization(e.to_string()))?;
    serde_json::from_value(scalar).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
