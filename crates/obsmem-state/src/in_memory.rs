//! In-memory `RecordStore` backend
//!
//! Reference semantics for the storage contract, backed by a
//! `HashMap<ScopeKey, Vec<record>>` with each list kept newest first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{ObservationalMemoryRecord, RecordFlag, RecordId, ScopeKey};
use crate::storage_traits::{RecordStore, StorageResult};

type Generations = HashMap<ScopeKey, Vec<ObservationalMemoryRecord>>;

/// In-memory record store. Index 0 of each list is the current generation.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Generations>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored generations across all keys
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .map(|r| r.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Generations>> {
        self.records
            .lock()
            .map_err(|e| StorageError::Backend(format!("record map lock poisoned: {e}")))
    }

    fn find_mut<'a>(
        records: &'a mut Generations,
        id: &RecordId,
    ) -> Option<&'a mut ObservationalMemoryRecord> {
        records
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|r| r.id == *id)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: &RecordId) -> StorageResult<Option<ObservationalMemoryRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .flat_map(|list| list.iter())
            .find(|r| r.id == *id)
            .cloned())
    }

    async fn current(&self, key: &ScopeKey) -> StorageResult<Option<ObservationalMemoryRecord>> {
        let records = self.lock()?;
        Ok(records.get(key).and_then(|list| list.first().cloned()))
    }

    async fn history(
        &self,
        key: &ScopeKey,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ObservationalMemoryRecord>> {
        let records = self.lock()?;
        let list = records.get(key).map(Vec::as_slice).unwrap_or_default();
        let take = limit.unwrap_or(list.len());
        Ok(list.iter().take(take).cloned().collect())
    }

    async fn append(&self, record: ObservationalMemoryRecord) -> StorageResult<()> {
        let mut records = self.lock()?;
        if Self::find_mut(&mut records, &record.id).is_some() {
            return Err(StorageError::DuplicateRecord {
                id: record.id.0.clone(),
            });
        }
        let key = record.scope_key();
        debug!(key = %key, record_id = %record.id, generation = record.generation_count, "appending generation");
        records.entry(key).or_default().insert(0, record);
        Ok(())
    }

    async fn upsert(&self, mut record: ObservationalMemoryRecord) -> StorageResult<()> {
        let mut records = self.lock()?;
        let slot =
            Self::find_mut(&mut records, &record.id).ok_or_else(|| StorageError::RecordNotFound {
                id: record.id.0.clone(),
            })?;
        for flag in RecordFlag::ALL {
            record.set_flag(flag, slot.flag(flag));
        }
        *slot = record;
        Ok(())
    }

    async fn set_flag(&self, id: &RecordId, flag: RecordFlag, value: bool) -> StorageResult<()> {
        let mut records = self.lock()?;
        let record = Self::find_mut(&mut records, id).ok_or_else(|| {
            StorageError::RecordNotFound {
                id: id.0.clone(),
            }
        })?;
        record.set_flag(flag, value);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn compare_and_set_flag(
        &self,
        id: &RecordId,
        flag: RecordFlag,
        expected: bool,
        new: bool,
    ) -> StorageResult<bool> {
        let mut records = self.lock()?;
        let record = Self::find_mut(&mut records, id).ok_or_else(|| {
            StorageError::RecordNotFound {
                id: id.0.clone(),
            }
        })?;
        if record.flag(flag) != expected {
            return Ok(false);
        }
        record.set_flag(flag, new);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn clear(&self, key: &ScopeKey) -> StorageResult<usize> {
        let mut records = self.lock()?;
        Ok(records.remove(key).map(|list| list.len()).unwrap_or(0))
    }
}
