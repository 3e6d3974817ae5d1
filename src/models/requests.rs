//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::cache::Ttl;

/// Request body for PUT /cache/:key
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The value to store
    pub value: JsonValue,
    /// Optional TTL in seconds; omitted means the configured expiry
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    pub fn ttl(&self) -> Ttl {
        Ttl::from(self.ttl)
    }
}

/// Request body for POST /cache/batch/get and POST /cache/batch/delete
#[derive(Debug, Clone, Deserialize)]
pub struct KeysRequest {
    pub keys: Vec<String>,
}

/// Request body for PUT /cache/batch
#[derive(Debug, Clone, Deserialize)]
pub struct SetManyRequest {
    /// Values by key, all written with the same TTL
    pub items: Map<String, JsonValue>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetManyRequest {
    pub fn ttl(&self) -> Ttl {
        Ttl::from(self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"value": {"name": "hello"}}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, json!({"name": "hello"}));
        assert_eq!(req.ttl(), Ttl::Default);
    }

    #[test]
    fn test_set_request_with_ttl() {
        let json = r#"{"value": "hello", "ttl": 60}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl(), Ttl::Seconds(60));
    }

    #[test]
    fn test_set_request_zero_ttl_never_expires() {
        let req: SetRequest = serde_json::from_str(r#"{"value": 1, "ttl": 0}"#).unwrap();
        assert_eq!(req.ttl(), Ttl::Seconds(0));
    }

    #[test]
    fn test_set_many_request_deserialize() {
        let json = r#"{"items": {"a": 1, "b": [true]}, "ttl": 5}"#;
        let req: SetManyRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.items.len(), 2);
        assert_eq!(req.items["b"], json!([true]));
        assert_eq!(req.ttl(), Ttl::Seconds(5));
    }

    #[test]
    fn test_keys_request_deserialize() {
        let req: KeysRequest = serde_json::from_str(r#"{"keys": ["x", "y"]}"#).unwrap();
        assert_eq!(req.keys, vec!["x", "y"]);
    }
}
