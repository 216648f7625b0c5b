//! REST API endpoints

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use meshgate_engine::DiagnosticsReport;

use crate::AppState;

/// Health check endpoint
///
/// `DEGRADED` means dual mode was configured but only one network came up.
pub async fn health(State(state): State<Arc<AppState>>) -> &'static str {
    if state.engine.diagnostics().mismatch {
        "DEGRADED"
    } else {
        "OK"
    }
}

/// Node info endpoint
#[derive(Serialize)]
pub struct NodeInfo {
    pub version: &'static str,
    pub mode: String,
    pub dual_mode_healthy: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

pub async fn node_info(State(state): State<Arc<AppState>>) -> Json<NodeInfo> {
    Json(NodeInfo {
        version: env!("CARGO_PKG_VERSION"),
        mode: state.engine.mode().to_string(),
        dual_mode_healthy: state.engine.is_dual_mode_healthy(),
        started_at: state.started_at,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Diagnostics report
pub async fn status(State(state): State<Arc<AppState>>) -> Json<DiagnosticsReport> {
    Json(state.engine.diagnostics())
}
