use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod analysis;
pub mod health;
pub mod metrics;

/// Analysis API routes, mounted under `/api/v1` by the server.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/scans/{scan_id}/analyze", post(analysis::trigger_analysis))
        .route(
            "/scans/{scan_id}/analysis-status",
            get(analysis::analysis_status),
        )
        .with_state(state)
}

/// Health check plus the versioned analysis API.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .with_state(state.clone())
        .nest("/api/v1", api_router(state))
}
