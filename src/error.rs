//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache driver.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed key or batch input, raised before any I/O
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A backend reported an error that is not a plain miss
    #[error("Backend fault: {0}")]
    Backend(String),

    /// The exclusive lock on a cache file could not be taken
    #[error("Failed to lock {}: {source}", path.display())]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value could not be encoded or decoded
    #[error("Serialization fault: {0}")]
    Serialization(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP front found no value for the key
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// A cache operation failed; wraps the underlying cause
    #[error("Cache operation `{operation}` failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    // == Wrap ==
    /// Wraps a fault raised inside `operation`.
    ///
    /// Validation errors and already-wrapped errors pass through unchanged.
    pub fn wrap(operation: &'static str, err: CacheError) -> Self {
        match err {
            CacheError::Validation(_) | CacheError::Operation { .. } => err,
            other => CacheError::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    // == Root Cause ==
    /// Returns the innermost error, unwrapping operation layers.
    pub fn root_cause(&self) -> &CacheError {
        match self {
            CacheError::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.root_cause() {
            CacheError::Validation(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::Backend(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
