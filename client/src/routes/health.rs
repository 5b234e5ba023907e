//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{orchestrator::Lifecycle, AppState};

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub lifecycle: Lifecycle,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let lifecycle = state.orchestrator.lifecycle();
    let status = match lifecycle {
        Lifecycle::Active => "ok",
        Lifecycle::Error => "error",
        _ => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        lifecycle,
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Ordo Sync Client"
}
