//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.
//!
//! Cache calls block on disk or network I/O, so each one runs on the
//! blocking pool while holding the cache mutex.

use std::sync::Arc;
use tokio::sync::Mutex;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value as JsonValue;

use crate::cache::Ttl;
use crate::config::{Config, DynCache};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteManyResponse, DeleteResponse, ExistsResponse, GetManyResponse,
    GetResponse, HealthResponse, KeysRequest, SetManyRequest, SetManyResponse, SetRequest,
    SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The configured cache behind an async-aware lock
    pub cache: Arc<Mutex<DynCache>>,
}

impl AppState {
    /// Creates a new AppState around a built cache.
    pub fn new(cache: DynCache) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Builds the configured driver and cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.build_cache()?))
    }

    /// Runs `op` against the cache on the blocking pool.
    async fn run<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut DynCache) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || {
            let mut cache = cache.blocking_lock();
            op(&mut cache)
        })
        .await
        .map_err(|e| CacheError::Internal(format!("cache task failed: {e}")))?
    }
}

/// Handler for GET /cache/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let lookup = key.clone();
    let value = state
        .run(move |cache| cache.get::<Option<JsonValue>>(&lookup, None))
        .await?;

    match value {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for PUT /cache/:key
///
/// Stores a JSON value with an optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let target = key.clone();
    let ttl = req.ttl();
    let stored = state
        .run(move |cache| cache.set(&target, req.value, ttl))
        .await?;

    Ok(Json(SetResponse { key, stored }))
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let target = key.clone();
    let deleted = state.run(move |cache| cache.delete(&target)).await?;

    Ok(Json(DeleteResponse { key, deleted }))
}

/// Handler for GET /cache/:key/exists
pub async fn exists_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ExistsResponse>> {
    let target = key.clone();
    let exists = state.run(move |cache| cache.has(&target)).await?;

    Ok(Json(ExistsResponse { key, exists }))
}

/// Handler for POST /cache/batch/get
pub async fn get_many_handler(
    State(state): State<AppState>,
    Json(req): Json<KeysRequest>,
) -> Result<Json<GetManyResponse>> {
    let values = state
        .run(move |cache| cache.get_multiple::<Option<JsonValue>, _, _>(&req.keys, None))
        .await?;

    Ok(Json(GetManyResponse::new(values)))
}

/// Handler for PUT /cache/batch
pub async fn set_many_handler(
    State(state): State<AppState>,
    Json(req): Json<SetManyRequest>,
) -> Result<Json<SetManyResponse>> {
    let ttl: Ttl = req.ttl();
    let stored = state
        .run(move |cache| cache.set_multiple(req.items, ttl))
        .await?;

    Ok(Json(SetManyResponse { stored }))
}

/// Handler for POST /cache/batch/delete
pub async fn delete_many_handler(
    State(state): State<AppState>,
    Json(req): Json<KeysRequest>,
) -> Result<Json<DeleteManyResponse>> {
    let deleted = state
        .run(move |cache| cache.delete_multiple(&req.keys))
        .await?;

    Ok(Json(DeleteManyResponse { deleted }))
}

/// Handler for DELETE /cache
///
/// Clearing is best-effort; a failed wipe reports `cleared: false`.
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let cleared = state.run(|cache| Ok(cache.clear())).await?;

    Ok(Json(ClearResponse { cleared }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = state.cache.lock().await;
    Json(StatsResponse::new(cache.driver().name(), &cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BaseCache, CacheConfig, SerializerKind};
    use crate::drivers::{CacheDriver, MemoryDriver};
    use serde_json::json;

    /// JSON documents need the JSON serializer, as the server configures it.
    fn test_state(config: CacheConfig) -> AppState {
        let driver: Box<dyn CacheDriver> = Box::new(MemoryDriver::new());
        let config = config.serializer(SerializerKind::Json);
        AppState::new(BaseCache::new(driver, config))
    }

    fn set_request(value: JsonValue) -> Json<SetRequest> {
        Json(SetRequest { value, ttl: None })
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = test_state(CacheConfig::new());

        let result = set_handler(
            State(state.clone()),
            Path("test_key".to_string()),
            set_request(json!({"n": [1, 2]})),
        )
        .await;
        assert!(result.unwrap().stored);

        let response = get_handler(State(state), Path("test_key".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value, json!({"n": [1, 2]}));
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state(CacheConfig::new());

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = test_state(CacheConfig::new());
        set_handler(
            State(state.clone()),
            Path("to_delete".to_string()),
            set_request(json!("value")),
        )
        .await
        .unwrap();

        let result = delete_handler(State(state.clone()), Path("to_delete".to_string())).await;
        assert!(result.unwrap().deleted);

        let exists = exists_handler(State(state), Path("to_delete".to_string()))
            .await
            .unwrap();
        assert!(!exists.exists);
    }

    #[tokio::test]
    async fn test_batch_handlers() {
        let state = test_state(CacheConfig::new().scope("api:"));

        let items = json!({"a": 1, "b": "two"}).as_object().cloned().unwrap();
        let stored = set_many_handler(
            State(state.clone()),
            Json(SetManyRequest { items, ttl: Some(60) }),
        )
        .await
        .unwrap();
        assert!(stored.stored);

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let response = get_many_handler(State(state.clone()), Json(KeysRequest { keys }))
            .await
            .unwrap();
        assert_eq!(response.values["a"], json!(1));
        assert_eq!(response.values["b"], json!("two"));
        assert_eq!(response.values["c"], JsonValue::Null);

        let keys = vec!["a".to_string(), "b".to_string()];
        let deleted = delete_many_handler(State(state), Json(KeysRequest { keys }))
            .await
            .unwrap();
        assert!(deleted.deleted);
    }

    #[tokio::test]
    async fn test_clear_handler() {
        let state = test_state(CacheConfig::new());
        set_handler(State(state.clone()), Path("k".to_string()), set_request(json!(1)))
            .await
            .unwrap();

        let response = clear_handler(State(state.clone())).await.unwrap();
        assert!(response.cleared);

        let result = get_handler(State(state), Path("k".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let state = test_state(CacheConfig::new());
        let _ = get_handler(State(state.clone()), Path("missing".to_string())).await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.driver, "memory");
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 1);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_set_invalid_key() {
        let state = test_state(CacheConfig::new());

        let result = set_handler(
            State(state),
            Path("user:1".to_string()),
            set_request(json!("value")),
        )
        .await;
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }
}
