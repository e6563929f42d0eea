//! Storage trait for observational memory records
//!
//! `RecordStore` is the single repository contract every backend satisfies.
//! Records are grouped by `ScopeKey` into generation lists, newest first.
//! The trait is async and backend-agnostic; `InMemoryRecordStore` provides
//! the reference semantics and `SurrealRecordStore` a persistent backend.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{ObservationalMemoryRecord, RecordFlag, RecordId, ScopeKey};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keyed, generation-ordered record repository.
///
/// Guarantees:
/// - `append(record)` makes `record` the current (head) generation of its key.
///   Earlier generations stay queryable through `history`.
/// - `history(key, _)` returns generations newest first.
/// - `upsert(record)` replaces the stored record with the same id in place,
///   wherever it sits in its generation list. The four in-flight flags are
///   not written: the stored values survive, whatever `record` carries.
/// - Flags change only through `set_flag` and `compare_and_set_flag`.
///   `compare_and_set_flag` is a single atomic step: no other write to the
///   same record may interleave between the check and the set.
/// - `clear(key)` is idempotent.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up any generation by id.
    async fn get(&self, id: &RecordId) -> StorageResult<Option<ObservationalMemoryRecord>>;

    /// The current (head) generation for a key, if any.
    async fn current(&self, key: &ScopeKey) -> StorageResult<Option<ObservationalMemoryRecord>>;

    /// Generations for a key, newest first, truncated to `limit` when given.
    async fn history(
        &self,
        key: &ScopeKey,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ObservationalMemoryRecord>>;

    /// Insert a new head generation. Fails with `DuplicateRecord` if the id exists.
    async fn append(&self, record: ObservationalMemoryRecord) -> StorageResult<()>;

    /// Replace an existing record by id, keeping its stored flags.
    /// Fails with `RecordNotFound` if absent.
    async fn upsert(&self, record: ObservationalMemoryRecord) -> StorageResult<()>;

    /// Unconditionally write one flag. Fails with `RecordNotFound` if absent.
    async fn set_flag(&self, id: &RecordId, flag: RecordFlag, value: bool) -> StorageResult<()>;

    /// Set `flag` to `new` only if it currently equals `expected`.
    ///
    /// Returns whether the swap happened. Fails with `RecordNotFound` if absent.
    async fn compare_and_set_flag(
        &self,
        id: &RecordId,
        flag: RecordFlag,
        expected: bool,
        new: bool,
    ) -> StorageResult<bool>;

    /// Remove every generation for a key, returning how many were removed.
    async fn clear(&self, key: &ScopeKey) -> StorageResult<usize>;
}
