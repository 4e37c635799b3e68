use axum::{extract::Query, extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::AppState;
use crate::PositionEstimate;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/trajectory", get(handler))
}

async fn handler(
    Query(params): Query<TrajectoryQuery>,
    State(state): State<AppState>,
) -> Json<Vec<PositionEstimate>> {
    // ---
    let snapshot = state.history.snapshot().await;
    let points = apply_filters(snapshot, &params);
    debug!("GET /api/trajectory - returning {} points", points.len());
    Json(points)
}

/// Query parameters for narrowing the trajectory
#[derive(Debug, Default, Deserialize)]
pub struct TrajectoryQuery {
    /// Keep points at or after this instant (RFC 3339)
    since: Option<DateTime<Utc>>,
    /// Keep only the most recent N points
    limit: Option<usize>,
}

/// Apply query filters, preserving arrival order
fn apply_filters(points: Vec<PositionEstimate>, params: &TrajectoryQuery) -> Vec<PositionEstimate> {
    // ---
    let mut points: Vec<_> = points
        .into_iter()
        .filter(|p| params.since.map_or(true, |since| p.timestamp >= since))
        .collect();

    if let Some(limit) = params.limit {
        let excess = points.len().saturating_sub(limit);
        points.drain(..excess);
    }

    points
}
