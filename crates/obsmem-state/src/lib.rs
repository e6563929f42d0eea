//! obsmem-state: record storage for observational memory
//!
//! This crate provides the persistence layer for the observational memory
//! engine: the record and chunk schema, the `RecordStore` repository trait,
//! and two interchangeable backends.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: generation ordering per scope key and atomic single-record updates.
//! No activation or reflection logic lives here.
//!
//! ## Key Components
//!
//! - `RecordStore`: generation-ordered repository with atomic flag writes
//! - `InMemoryRecordStore`: reference semantics, no external dependencies
//! - `SurrealRecordStore`: SurrealDB backend, located by a `StoreConfig`

mod config;
mod error;
pub mod in_memory;
pub mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use config::{
    AuthLevel, Credentials, StoreConfig, StoreTarget, DEFAULT_DATABASE, DEFAULT_LOCAL_PATH,
    DEFAULT_NAMESPACE,
};
pub use error::{StateError, StorageError};
pub use in_memory::InMemoryRecordStore;
pub use schema::{
    BufferedObservationChunk, MemoryScope, NewObservationChunk, ObservationCursor,
    ObservationalMemoryRecord, OriginType, RecordFlag, RecordId, ScopeKey,
};
pub use storage_traits::{RecordStore, StorageResult};
pub use surreal_store::SurrealRecordStore;

/// Result type for obsmem-state backend setup
pub type Result<T> = std::result::Result<T, StateError>;
