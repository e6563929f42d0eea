//! The `ObservationalMemory` engine and its record-level operations.
//!
//! Buffering, activation, reflection and flag operations live in their own
//! modules as further `impl ObservationalMemory` blocks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use obsmem_state::{
    InMemoryRecordStore, MemoryScope, ObservationCursor, ObservationalMemoryRecord, RecordId,
    RecordStore, ScopeKey,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{OmError, OmResult};
use crate::obs;

/// Caller-supplied replacement for a record's active observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveObservationsUpdate {
    pub observations: String,
    /// Tokens in `observations`
    pub token_count: u64,
    pub last_observed_at: DateTime<Utc>,
    /// Replaces the safeguard list when given
    #[serde(default)]
    pub observed_message_ids: Option<Vec<String>>,
}

/// Observational memory over an injected record store.
///
/// Performs no locking of its own. Callers coordinate in-flight work per key
/// through the record flags.
#[derive(Clone)]
pub struct ObservationalMemory {
    store: Arc<dyn RecordStore>,
}

impl ObservationalMemory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Engine backed by a fresh [`InMemoryRecordStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRecordStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub(crate) async fn load(&self, id: &RecordId) -> OmResult<ObservationalMemoryRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OmError::NotFound { id: id.0.clone() })
    }

    pub(crate) async fn save(&self, mut record: ObservationalMemoryRecord) -> OmResult<()> {
        record.touch();
        self.store.upsert(record).await?;
        Ok(())
    }

    /// Load, mutate and write back one record.
    ///
    /// The store keeps its own flag values on upsert, so the written record
    /// is read back rather than returned as mutated.
    pub(crate) async fn modify<F>(&self, id: &RecordId, f: F) -> OmResult<ObservationalMemoryRecord>
    where
        F: FnOnce(&mut ObservationalMemoryRecord),
    {
        let mut record = self.load(id).await?;
        f(&mut record);
        self.save(record).await?;
        self.load(id).await
    }

    /// Create the generation-0 record for a key.
    ///
    /// Returns the current head unchanged if the key already has one.
    /// Thread scope without a thread id is rejected.
    pub async fn initialize_observational_memory(
        &self,
        thread_id: Option<&str>,
        resource_id: &str,
        scope: MemoryScope,
        config: serde_json::Value,
    ) -> OmResult<ObservationalMemoryRecord> {
        let key = ScopeKey::for_scope(scope, thread_id, resource_id).ok_or_else(|| {
            OmError::MissingThreadId {
                resource_id: resource_id.to_string(),
            }
        })?;
        if let Some(existing) = self.store.current(&key).await? {
            debug!(scope_key = %key, record_id = %existing.id, "memory already initialized");
            return Ok(existing);
        }

        let record = ObservationalMemoryRecord::new_initial(
            scope,
            thread_id.map(str::to_string),
            resource_id.to_string(),
            config,
        );
        self.store.append(record.clone()).await?;
        obs::emit_initialized(record.id.as_str(), &key.to_string());
        Ok(record)
    }

    /// Current generation for a key.
    pub async fn get_observational_memory(
        &self,
        key: &ScopeKey,
    ) -> OmResult<Option<ObservationalMemoryRecord>> {
        Ok(self.store.current(key).await?)
    }

    /// Generations for a key, newest first.
    pub async fn get_observational_memory_history(
        &self,
        key: &ScopeKey,
        limit: Option<usize>,
    ) -> OmResult<Vec<ObservationalMemoryRecord>> {
        Ok(self.store.history(key, limit).await?)
    }

    pub async fn get_observational_memory_by_id(
        &self,
        id: &RecordId,
    ) -> OmResult<Option<ObservationalMemoryRecord>> {
        Ok(self.store.get(id).await?)
    }

    /// Install a synchronous observation result.
    ///
    /// Everything pending was just observed, so raw-message pressure resets.
    #[instrument(skip_all, fields(record_id = %id))]
    pub async fn update_active_observations(
        &self,
        id: &RecordId,
        update: ActiveObservationsUpdate,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.modify(id, |record| {
            record.active_observations = update.observations;
            record.observation_token_count = update.token_count;
            record.total_tokens_observed =
                record.total_tokens_observed.saturating_add(update.token_count);
            record.pending_message_tokens = 0;
            record.last_observed_at = ObservationCursor::ObservedAt(update.last_observed_at);
            if let Some(ids) = update.observed_message_ids {
                record.observed_message_ids = ids;
            }
        })
        .await
    }

    pub async fn set_pending_message_tokens(
        &self,
        id: &RecordId,
        tokens: u64,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.modify(id, |record| record.pending_message_tokens = tokens)
            .await
    }

    /// Add newly arrived raw-message tokens to the pending count.
    pub async fn add_pending_message_tokens(
        &self,
        id: &RecordId,
        delta: u64,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.modify(id, |record| {
            record.pending_message_tokens = record.pending_message_tokens.saturating_add(delta);
        })
        .await
    }

    pub async fn update_config(
        &self,
        id: &RecordId,
        config: serde_json::Value,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.modify(id, |record| record.config = config).await
    }

    /// Remove every generation for a key. Returns how many were removed.
    pub async fn clear_observational_memory(&self, key: &ScopeKey) -> OmResult<usize> {
        let removed = self.store.clear(key).await?;
        obs::emit_cleared(&key.to_string(), removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_initialize_is_idempotent_per_key() {
        let om = ObservationalMemory::in_memory();
        let first = om
            .initialize_observational_memory(Some("t-1"), "r-1", MemoryScope::Thread, Value::Null)
            .await
            .unwrap();
        let second = om
            .initialize_observational_memory(Some("t-1"), "r-1", MemoryScope::Thread, Value::Null)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let history = om
            .get_observational_memory_history(&ScopeKey::thread("t-1"), None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_update_active_observations_resets_pending() {
        let om = ObservationalMemory::in_memory();
        let rec = om
            .initialize_observational_memory(Some("t-2"), "r-1", MemoryScope::Thread, Value::Null)
            .await
            .unwrap();
        om.set_pending_message_tokens(&rec.id, 700).await.unwrap();

        let at = Utc::now();
        let updated = om
            .update_active_observations(
                &rec.id,
                ActiveObservationsUpdate {
                    observations: "- user prefers tea".to_string(),
                    token_count: 12,
                    last_observed_at: at,
                    observed_message_ids: Some(vec!["m-1".to_string()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.pending_message_tokens, 0);
        assert_eq!(updated.observation_token_count, 12);
        assert_eq!(updated.total_tokens_observed, 12);
        assert_eq!(updated.last_observed_at, ObservationCursor::ObservedAt(at));
        assert_eq!(updated.observed_message_ids, vec!["m-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let om = ObservationalMemory::in_memory();
        let err = om
            .add_pending_message_tokens(&RecordId::from("missing"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, OmError::NotFound { ref id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_thread_scope_without_thread_id_is_rejected() {
        let om = ObservationalMemory::in_memory();
        let resource = om
            .initialize_observational_memory(None, "r-3", MemoryScope::Resource, Value::Null)
            .await
            .unwrap();

        let err = om
            .initialize_observational_memory(None, "r-3", MemoryScope::Thread, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, OmError::MissingThreadId { ref resource_id } if resource_id == "r-3"));

        let history = om
            .get_observational_memory_history(&ScopeKey::resource("r-3"), None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, resource.id);
        assert_eq!(history[0].scope, MemoryScope::Resource);
    }
}
