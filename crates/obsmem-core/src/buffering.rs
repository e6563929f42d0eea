//! Staging observation chunks and reflection text ahead of activation.

use chrono::{DateTime, Utc};
use obsmem_state::{
    BufferedObservationChunk, NewObservationChunk, ObservationalMemoryRecord, RecordId,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::activation::BLOCK_SEPARATOR;
use crate::engine::ObservationalMemory;
use crate::error::OmResult;
use crate::obs;

/// Reflection output staged against the leading lines it condenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedReflectionUpdate {
    pub reflection: String,
    /// Tokens in `reflection`
    pub token_count: u64,
    /// Tokens of active text fed to the reflector
    pub input_token_count: u64,
    /// Leading lines of active text this reflection replaces
    pub reflected_observation_line_count: usize,
}

/// Append a chunk to the buffer, oldest first.
pub fn push_chunk(
    record: &mut ObservationalMemoryRecord,
    chunk: NewObservationChunk,
    last_buffered_at_time: Option<DateTime<Utc>>,
) -> BufferedObservationChunk {
    let chunk = chunk.into_chunk();
    record.buffered_observation_chunks.push(chunk.clone());
    if let Some(at) = last_buffered_at_time {
        record.last_buffered_at_time = Some(at);
    }
    chunk
}

/// Fold a reflection update into the staged reflection.
///
/// Text and token counts accumulate. The line count is replaced, since each
/// reflection call covers the active text as it stood at that moment.
pub fn stage_reflection(record: &mut ObservationalMemoryRecord, update: BufferedReflectionUpdate) {
    record.buffered_reflection = Some(match record.buffered_reflection.take() {
        Some(existing) if !existing.is_empty() => {
            format!("{existing}{BLOCK_SEPARATOR}{}", update.reflection)
        }
        _ => update.reflection,
    });
    record.buffered_reflection_tokens =
        Some(record.buffered_reflection_tokens.unwrap_or(0) + update.token_count);
    record.buffered_reflection_input_tokens =
        Some(record.buffered_reflection_input_tokens.unwrap_or(0) + update.input_token_count);
    record.reflected_observation_line_count = Some(update.reflected_observation_line_count);
}

impl ObservationalMemory {
    /// Buffer one observation cycle's output. Active text and token counters
    /// are untouched until activation.
    #[instrument(skip_all, fields(record_id = %id, cycle_id = %chunk.cycle_id))]
    pub async fn update_buffered_observations(
        &self,
        id: &RecordId,
        chunk: NewObservationChunk,
        last_buffered_at_time: Option<DateTime<Utc>>,
    ) -> OmResult<BufferedObservationChunk> {
        let mut record = self.load(id).await?;
        let stored = push_chunk(&mut record, chunk, last_buffered_at_time);
        let buffered = record.buffered_observation_chunks.len();
        self.save(record).await?;

        obs::emit_chunk_buffered(
            id.as_str(),
            &stored.cycle_id,
            stored.message_tokens,
            buffered,
        );
        Ok(stored)
    }

    /// Stage reflection text for a later swap.
    #[instrument(skip_all, fields(record_id = %id))]
    pub async fn update_buffered_reflection(
        &self,
        id: &RecordId,
        update: BufferedReflectionUpdate,
    ) -> OmResult<ObservationalMemoryRecord> {
        let line_count = update.reflected_observation_line_count;
        let record = self
            .modify(id, |record| stage_reflection(record, update))
            .await?;

        obs::emit_reflection_buffered(
            id.as_str(),
            record.buffered_reflection_tokens.unwrap_or(0),
            line_count,
        );
        Ok(record)
    }
}
