//! Error types for the sync client and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ordo_sync_engine::RecordId;
use serde::Serialize;
use std::time::Duration;

/// Local store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Engine error: {0}")]
    Engine(#[from] ordo_sync_engine::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Table {0} does not exist")]
    MissingTable(String),

    #[error("Table {table} is missing column {column}")]
    MissingColumn { table: String, column: String },

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// The store lacks a table or column the sync engine needs.
    pub fn is_missing_capability(&self) -> bool {
        matches!(
            self,
            StoreError::MissingTable(_) | StoreError::MissingColumn { .. }
        )
    }
}

/// Shape transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport closed")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Protocol(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Sync orchestrator errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Cannot reach shape endpoint: {0}")]
    Connectivity(#[source] TransportError),

    #[error("Connectivity probe timed out after {0:?}")]
    ConnectivityTimeout(Duration),

    #[error("Failed to apply change to record {record_id}: {source}")]
    ConflictApplication {
        record_id: RecordId,
        #[source]
        source: StoreError,
    },

    #[error("No pending conflict for record {0}")]
    ConflictNotFound(RecordId),

    #[error("Local store is missing a required capability: {0}")]
    MissingCapability(String),

    #[error("Initial sync of {table} failed: {reason}")]
    InitialSync { table: String, reason: String },

    #[error("Sync is not active")]
    NotActive,

    #[error("Sync start was cancelled by shutdown")]
    Cancelled,

    #[error("Resolution targets record {actual}, expected {expected}")]
    ResolutionMismatch { expected: RecordId, actual: RecordId },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for orchestrator operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// HTTP error type for the control routes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Sync(err) => match err {
                SyncError::ConflictNotFound(_) => (StatusCode::NOT_FOUND, err.to_string(), None),
                SyncError::ResolutionMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, err.to_string(), None)
                }
                SyncError::NotActive | SyncError::Cancelled => {
                    (StatusCode::CONFLICT, err.to_string(), None)
                }
                SyncError::Connectivity(_)
                | SyncError::ConnectivityTimeout(_)
                | SyncError::InitialSync { .. } => {
                    tracing::warn!("Sync unavailable: {}", err);
                    (StatusCode::SERVICE_UNAVAILABLE, err.to_string(), None)
                }
                SyncError::Transport(e) => {
                    tracing::warn!("Transport error: {:?}", e);
                    (StatusCode::BAD_GATEWAY, "Transport error".to_string(), Some(e.to_string()))
                }
                SyncError::Store(e) | SyncError::ConflictApplication { source: e, .. } => {
                    tracing::error!("Store error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Database error".to_string(),
                        Some(err.to_string()),
                    )
                }
                SyncError::MissingCapability(msg) => {
                    tracing::error!("Missing capability: {}", msg);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Local store is not ready".to_string(),
                        Some(msg.clone()),
                    )
                }
            },
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;
