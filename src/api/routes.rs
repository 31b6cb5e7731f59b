//! API routes

use crate::api::handlers::{health_check, scan_library, stream_song, AppState};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the API routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/scan", post(scan_library))
        .route("/api/songs/:id/stream", get(stream_song))
        .with_state(state)
}
