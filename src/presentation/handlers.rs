// HTTP request handlers
use crate::presentation::app_state::AppState;
use crate::presentation::view::TrackingView;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Current render-ready view of the tracking session
pub async fn tracking_view(State(state): State<Arc<AppState>>) -> Json<TrackingView> {
    let snapshot = state.tracker.snapshot();
    Json(TrackingView::render(&snapshot, state.providers))
}

/// Stop the session. Repeated calls are accepted and do nothing.
pub async fn stop_tracking(State(state): State<Arc<AppState>>) -> StatusCode {
    tracing::info!("Stop requested over HTTP");
    state.tracker.stop().await;
    StatusCode::NO_CONTENT
}
