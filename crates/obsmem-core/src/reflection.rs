//! Reflection: condensing active observations into a new generation.
//!
//! A reflection never rewrites history. The condensed text becomes the head
//! of a fresh generation and the previous record stays readable by id.

use chrono::Utc;
use obsmem_state::{ObservationCursor, ObservationalMemoryRecord, OriginType, RecordId};
use tracing::{instrument, warn};

use crate::activation::BLOCK_SEPARATOR;
use crate::engine::ObservationalMemory;
use crate::error::{OmError, OmResult};
use crate::obs;

/// Replace the first `line_count` lines of `active` with `reflection`.
///
/// The untouched tail is trimmed and appended after a blank line. A
/// `line_count` past the end covers the whole text.
pub fn merge_reflection(active: &str, reflection: &str, line_count: usize) -> String {
    let tail = if active.is_empty() {
        String::new()
    } else {
        active
            .split('\n')
            .skip(line_count)
            .collect::<Vec<_>>()
            .join("\n")
    };
    let tail = tail.trim();
    if tail.is_empty() {
        reflection.to_string()
    } else {
        format!("{reflection}{BLOCK_SEPARATOR}{tail}")
    }
}

/// Build the generation that follows `current`, with `reflection` as its
/// whole active text.
pub fn next_generation(
    current: &ObservationalMemoryRecord,
    reflection: String,
    token_count: u64,
) -> ObservationalMemoryRecord {
    let now = Utc::now();
    let last_observed_at = match current.last_observed_at {
        ObservationCursor::Unobserved => ObservationCursor::ObservedAt(now),
        observed => observed,
    };

    ObservationalMemoryRecord {
        id: RecordId::new(),
        scope: current.scope,
        thread_id: current.thread_id.clone(),
        resource_id: current.resource_id.clone(),
        origin_type: OriginType::Reflection,
        generation_count: current.generation_count + 1,
        active_observations: reflection,
        buffered_observation_chunks: current.buffered_observation_chunks.clone(),
        buffered_reflection: None,
        buffered_reflection_tokens: None,
        buffered_reflection_input_tokens: None,
        reflected_observation_line_count: None,
        total_tokens_observed: current.total_tokens_observed,
        observation_token_count: token_count,
        pending_message_tokens: 0,
        last_observed_at,
        last_buffered_at_time: None,
        last_buffered_at_tokens: 0,
        is_observing: false,
        is_reflecting: false,
        is_buffering_observation: false,
        is_buffering_reflection: false,
        config: current.config.clone(),
        observed_message_ids: current.observed_message_ids.clone(),
        observed_timezone: current.observed_timezone.clone(),
        created_at: now,
        updated_at: now,
    }
}

impl ObservationalMemory {
    /// Append a reflection generation after `current`.
    ///
    /// Pending buffered chunks move to the new generation: they are taken
    /// from the stored copy of `current` and cleared there once the new
    /// generation is written. If the key's stored head is already past
    /// `current` (a stale snapshot), the new generation is numbered after
    /// the head instead.
    #[instrument(skip_all, fields(record_id = %current.id))]
    pub async fn create_reflection_generation(
        &self,
        current: &ObservationalMemoryRecord,
        reflection: String,
        token_count: u64,
    ) -> OmResult<ObservationalMemoryRecord> {
        let mut next = next_generation(current, reflection, token_count);
        let stored = self.store().get(&current.id).await?;
        if let Some(stored) = &stored {
            next.buffered_observation_chunks = stored.buffered_observation_chunks.clone();
        }

        if let Some(head) = self.store().current(&current.scope_key()).await? {
            if head.generation_count >= next.generation_count {
                warn!(
                    record_id = %current.id,
                    head_id = %head.id,
                    head_generation = head.generation_count,
                    "reflecting from a stale generation"
                );
                next.generation_count = head.generation_count + 1;
            }
        }

        self.store().append(next.clone()).await?;
        if stored.is_some_and(|r| !r.buffered_observation_chunks.is_empty()) {
            self.modify(&current.id, |record| record.buffered_observation_chunks.clear())
                .await?;
        }
        obs::emit_generation_created(
            current.id.as_str(),
            next.id.as_str(),
            next.generation_count,
        );
        Ok(next)
    }

    /// Promote the staged reflection into a new generation.
    ///
    /// The stored record is re-read so lines observed after the reflection
    /// was staged survive in the tail. Its staging fields are cleared only
    /// once the new generation has been written.
    #[instrument(skip_all, fields(record_id = %current.id))]
    pub async fn swap_buffered_reflection_to_active(
        &self,
        current: &ObservationalMemoryRecord,
        token_count: u64,
    ) -> OmResult<ObservationalMemoryRecord> {
        let stored = self.load(&current.id).await?;
        let reflection = match stored.buffered_reflection.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                return Err(OmError::NoBufferedReflection {
                    id: current.id.0.clone(),
                })
            }
        };

        let line_count = stored
            .reflected_observation_line_count
            .unwrap_or(0)
            .min(stored.active_line_count());
        let merged = merge_reflection(&stored.active_observations, &reflection, line_count);

        let next = self
            .create_reflection_generation(&stored, merged, token_count)
            .await?;

        self.modify(&current.id, |record| {
            record.clear_buffered_reflection();
            record.buffered_observation_chunks.clear();
        })
        .await?;
        Ok(next)
    }
}
