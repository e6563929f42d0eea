//! Error taxonomy for the observational memory engine.

use obsmem_state::StorageError;

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum OmError {
    #[error("observational memory record not found: {id}")]
    NotFound { id: String },

    #[error("no buffered reflection to swap on record {id}")]
    NoBufferedReflection { id: String },

    #[error("thread scope requires a thread id (resource {resource_id})")]
    MissingThreadId { resource_id: String },

    #[error("invalid observation config: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for OmError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RecordNotFound { id } => OmError::NotFound { id },
            other => OmError::Storage(other),
        }
    }
}

/// Result type for engine operations.
pub type OmResult<T> = std::result::Result<T, OmError>;
