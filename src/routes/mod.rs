//! HTTP gateway: merges the API subrouters, then falls back to static files.

use std::{path::Path, sync::Arc};

use axum::Router;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::{history::HistoryLog, reference::ReferenceStore};

mod health;
mod trajectory;

// ---

/// State shared by every route.
#[derive(Debug, Clone)]
pub struct AppState {
    pub history: Arc<HistoryLog>,
    pub store: Arc<ReferenceStore>,
}

pub fn router(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    // ---
    Router::new()
        .merge(trajectory::router())
        .merge(health::router())
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
