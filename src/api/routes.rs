//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, delete_many_handler, exists_handler, get_handler,
    get_many_handler, health_handler, set_handler, set_many_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET|PUT|DELETE /cache/:key` - Single-key read, write and delete
/// - `GET /cache/:key/exists` - Existence check
/// - `POST /cache/batch/get` - Read several keys
/// - `PUT /cache/batch` - Write several keys with one TTL
/// - `POST /cache/batch/delete` - Delete several keys
/// - `DELETE /cache` - Clear the cache
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Static batch routes take precedence over the `:key` parameter
    Router::new()
        .route("/cache", delete(clear_handler))
        .route("/cache/batch", put(set_many_handler))
        .route("/cache/batch/get", post(get_many_handler))
        .route("/cache/batch/delete", post(delete_many_handler))
        .route(
            "/cache/:key",
            get(get_handler).put(set_handler).delete(delete_handler),
        )
        .route("/cache/:key/exists", get(exists_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
