//! Error types for studysync-core

use thiserror::Error;

/// Result type alias using studysync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in studysync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Action record not found for the requesting owner
    #[error("Action not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unrecognized action type string
    #[error("Invalid action type: {0}")]
    InvalidActionType(String),

    /// Action payload missing required fields or violating field rules
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Resolution requested for a record that is not in conflict
    #[error("Action {0} is not in conflict")]
    NotInConflict(String),

    /// Retry requested for a record that is not in the failed state
    #[error("Action {0} is not in failed state")]
    NotFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error was caused by the caller's request rather than the backend.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::InvalidActionType(_) | Self::InvalidPayload(_)
        )
    }
}
