use super::AppState;
use crate::core::error::Result;
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Handler for GET /health
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>> {
    let songs = state.song_repo.count().await?;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
        "songs": songs,
        "scan_passes": state.scanner.passes(),
    })))
}
