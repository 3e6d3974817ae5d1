//! API Module
//!
//! HTTP handlers and routing that serve the cache contract as a REST API.
//!
//! # Endpoints
//! - `GET /cache/:key` - Retrieve a value by key
//! - `PUT /cache/:key` - Store a value
//! - `DELETE /cache/:key` - Delete a key
//! - `GET /cache/:key/exists` - Check for a live value
//! - `POST /cache/batch/get`, `PUT /cache/batch`, `POST /cache/batch/delete` - Batch variants
//! - `DELETE /cache` - Clear the cache
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
