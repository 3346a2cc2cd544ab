//! Error types for the synchronization core.

use thiserror::Error;

/// Synchronization core error type.
///
/// The taxonomy is deliberately coarse so callers can distinguish "retry"
/// ([`SyncError::Transport`]) from "fix your input"
/// ([`SyncError::Validation`]) without matching on backend internals.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Input rejected before any store call.
    #[error("validation error: {0}")]
    Validation(String),
    /// Operation required an existing target that has no backing record.
    ///
    /// Lookup operations return `Ok(None)` instead of this variant.
    #[error("not found: {0}")]
    NotFound(String),
    /// Race-created duplicate detected for a participant pair.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Store or network unavailability.
    #[error("transport error: {0}")]
    Transport(String),
    /// External collaborator (redaction backend, blob storage) failure.
    #[error("external service error: {0}")]
    ExternalService(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for SyncError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Convenience result alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
