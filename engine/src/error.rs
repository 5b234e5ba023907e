//! Error types for the sync engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Record errors
    #[error("record {id} is missing required field '{field}'")]
    IncompleteRecord { id: RecordId, field: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Configuration errors
    #[error("unknown conflict strategy: {0}")]
    InvalidStrategy(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
