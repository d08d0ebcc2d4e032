//! Error types for storage operations

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a telemetry or alarm store can report
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A write could not be applied
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    /// A read could not be served
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Value could not be (de)serialized for the backend
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Backend-specific error
    #[error("storage backend error: {0}")]
    BackendError(String),

    /// The backend is not healthy
    #[error("storage backend unhealthy: {0}")]
    UnhealthyBackend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
