//! Domain errors for the vpn-tuner optimizer.

use thiserror::Error;

/// Domain-level errors that can occur while optimizing a host.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(i64),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Remote execution failed: {0}")]
    RemoteFailed(String),

    #[error("Oracle request failed: {0}")]
    OracleFailed(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
