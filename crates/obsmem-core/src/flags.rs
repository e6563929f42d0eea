//! In-flight flags guarding one observation and one reflection per key.
//!
//! Flags are written only through the store's single-field flag operations;
//! whole-record saves never touch them. The plain setters are unconditional
//! writes. `try_acquire_flag` is the race-free variant, delegated to the
//! backend's compare-and-set.

use obsmem_state::{ObservationalMemoryRecord, RecordFlag, RecordId};

use crate::engine::ObservationalMemory;
use crate::error::OmResult;
use crate::obs;

impl ObservationalMemory {
    async fn set_flag(
        &self,
        id: &RecordId,
        flag: RecordFlag,
        value: bool,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.store().set_flag(id, flag, value).await?;
        obs::emit_flag_changed(id.as_str(), flag.field_name(), value);
        self.load(id).await
    }

    pub async fn set_observing_flag(
        &self,
        id: &RecordId,
        value: bool,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.set_flag(id, RecordFlag::Observing, value).await
    }

    pub async fn set_reflecting_flag(
        &self,
        id: &RecordId,
        value: bool,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.set_flag(id, RecordFlag::Reflecting, value).await
    }

    /// Also records the pending-token level a buffering cycle started at,
    /// when given.
    pub async fn set_buffering_observation_flag(
        &self,
        id: &RecordId,
        value: bool,
        last_buffered_at_tokens: Option<u64>,
    ) -> OmResult<ObservationalMemoryRecord> {
        if let Some(tokens) = last_buffered_at_tokens {
            self.modify(id, |record| record.last_buffered_at_tokens = tokens)
                .await?;
        }
        self.set_flag(id, RecordFlag::BufferingObservation, value)
            .await
    }

    pub async fn set_buffering_reflection_flag(
        &self,
        id: &RecordId,
        value: bool,
    ) -> OmResult<ObservationalMemoryRecord> {
        self.set_flag(id, RecordFlag::BufferingReflection, value)
            .await
    }

    /// Force every flag off, e.g. after a worker died mid-cycle.
    pub async fn clear_flags(&self, id: &RecordId) -> OmResult<ObservationalMemoryRecord> {
        for flag in RecordFlag::ALL {
            if self.store().compare_and_set_flag(id, flag, true, false).await? {
                obs::emit_flag_changed(id.as_str(), flag.field_name(), false);
            }
        }
        self.load(id).await
    }

    /// Raise `flag` only if it is currently down. Returns whether this call
    /// raised it.
    pub async fn try_acquire_flag(&self, id: &RecordId, flag: RecordFlag) -> OmResult<bool> {
        let acquired = self
            .store()
            .compare_and_set_flag(id, flag, false, true)
            .await?;
        if acquired {
            obs::emit_flag_changed(id.as_str(), flag.field_name(), true);
        }
        Ok(acquired)
    }

    /// Lower a flag raised by [`try_acquire_flag`](Self::try_acquire_flag).
    /// Lowering a flag that is already down is not an error.
    pub async fn release_flag(&self, id: &RecordId, flag: RecordFlag) -> OmResult<()> {
        let released = self
            .store()
            .compare_and_set_flag(id, flag, true, false)
            .await?;
        if released {
            obs::emit_flag_changed(id.as_str(), flag.field_name(), false);
        }
        Ok(())
    }

    /// Whether a caller holds any in-flight flag on the record.
    pub async fn is_busy(&self, id: &RecordId) -> OmResult<bool> {
        let record = self.load(id).await?;
        Ok(RecordFlag::ALL.iter().any(|flag| record.flag(*flag)))
    }
}
