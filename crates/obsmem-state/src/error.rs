//! Error types for obsmem-state

use thiserror::Error;

/// Errors raised while opening or preparing a storage backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by `RecordStore` operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record with this id exists in any generation list
    #[error("record not found: {id}")]
    RecordNotFound { id: String },

    /// `append` was called with an id that is already stored
    #[error("record already exists: {id}")]
    DuplicateRecord { id: String },

    /// Backend-specific failure (query, connection, lock poisoning)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded
    #[error("record serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
