// src/routes/health.rs
//! Service health endpoint.
//!
//! Besides liveness, this reports whether the reference database loaded.
//! An empty reference store keeps the service running but makes every scan
//! unmatched, so it is reported as `degraded` rather than hidden in the
//! startup log.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    reference_records: usize,
    trajectory_points: usize,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    let reference_records = state.store.len();
    let status = if reference_records == 0 { "degraded" } else { "ok" };

    Json(HealthResponse {
        status,
        reference_records,
        trajectory_points: state.history.len().await,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
