//! Status server
//!
//! REST endpoints for health checks and engine diagnostics.

pub mod rest;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Node info
        .route("/api/info", get(rest::node_info))
        // Full diagnostics report
        .route("/api/status", get(rest::status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
