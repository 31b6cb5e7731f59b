use super::AppState;
use crate::core::error::Result;
use crate::core::library_scanner::ScanReport;
use axum::{extract::State, Json};

/// Handler for POST /api/scan - Run (or join) a library scan
///
/// Responds once a pass covering this request has finished.
pub async fn scan_library(State(state): State<AppState>) -> Result<Json<ScanReport>> {
    let report = state.scan_handle.request_scan().await?;
    Ok(Json(report))
}
