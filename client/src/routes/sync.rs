//! Sync control routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use ordo_sync_engine::{SyncConflict, SyncState, Task};
use serde::Serialize;

use crate::error::{ApiError, Result};
use crate::orchestrator::Lifecycle;
use crate::writer::PushReport;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/state", get(state_handler))
        .route("/sync/conflicts", get(conflicts_handler))
        .route("/sync/conflicts/{id}/resolve", post(resolve_handler))
        .route("/sync/resync", post(resync_handler))
        .route("/sync/restart", post(restart_handler))
        .route("/sync/push", post(push_handler))
}

/// Response for the control actions.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub lifecycle: Lifecycle,
}

/// GET /sync/state - Aggregate sync state.
async fn state_handler(State(state): State<AppState>) -> Json<SyncState<Task>> {
    Json(state.orchestrator.sync_state())
}

/// GET /sync/conflicts - Conflicts awaiting manual resolution.
async fn conflicts_handler(State(state): State<AppState>) -> Json<Vec<SyncConflict<Task>>> {
    Json(state.orchestrator.conflicts())
}

/// POST /sync/conflicts/{id}/resolve - Settle a conflict with the posted record.
async fn resolve_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<Task>, JsonRejection>,
) -> Result<Json<SyncState<Task>>> {
    let Json(resolution) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.orchestrator.resolve_conflict(&id, resolution).await?;
    Ok(Json(state.orchestrator.sync_state()))
}

/// POST /sync/resync - Re-run initial sync for every table.
async fn resync_handler(State(state): State<AppState>) -> Result<Json<ControlResponse>> {
    state.orchestrator.force_sync_from_remote().await?;
    Ok(Json(ControlResponse {
        lifecycle: state.orchestrator.lifecycle(),
    }))
}

/// POST /sync/restart - Shut down and initialize again.
async fn restart_handler(State(state): State<AppState>) -> Result<Json<ControlResponse>> {
    state.orchestrator.restart().await?;
    Ok(Json(ControlResponse {
        lifecycle: state.orchestrator.lifecycle(),
    }))
}

/// POST /sync/push - Send pending local changes to the write server.
async fn push_handler(State(state): State<AppState>) -> Result<Json<PushReport>> {
    let report = state.orchestrator.push_local_changes().await?;
    Ok(Json(report))
}
