//! Activation: folding buffered observation chunks into active context.
//!
//! Boundary selection is a pure function ([`plan_activation`]) over the
//! chunk list, so it can be previewed and tested without a store. Applying
//! a plan consumes a prefix of the buffer, merges its text into
//! `active_observations` and frees the raw-message tokens it summarized.

use chrono::{DateTime, Utc};
use obsmem_state::{
    BufferedObservationChunk, ObservationCursor, ObservationalMemoryRecord, RecordId,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::engine::ObservationalMemory;
use crate::error::OmResult;
use crate::obs;

/// Multiplier on the retention floor bounding how far an over-boundary may
/// overshoot the target.
pub const MAX_OVERSHOOT_FACTOR: f64 = 0.95;

/// Upper bound on the raw-message tokens that must remain after activation.
pub const MIN_REMAINING_TOKENS: f64 = 1000.0;

/// Separator between observation blocks in active text.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Inputs to one activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationParams {
    /// Fraction of `message_tokens_threshold` to release, in `[0, 1]`.
    pub activation_ratio: f64,
    pub message_tokens_threshold: u64,
    /// Live raw-message pressure at the time of the call.
    pub current_pending_tokens: u64,
    #[serde(default)]
    pub force_max_activation: bool,
    /// Explicit cursor override; otherwise the newest activated chunk's.
    #[serde(default)]
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl ActivationParams {
    pub fn new(
        activation_ratio: f64,
        message_tokens_threshold: u64,
        current_pending_tokens: u64,
    ) -> Self {
        Self {
            activation_ratio,
            message_tokens_threshold,
            current_pending_tokens,
            force_max_activation: false,
            last_observed_at: None,
        }
    }

    pub fn with_force_max_activation(mut self, force: bool) -> Self {
        self.force_max_activation = force;
        self
    }

    pub fn with_last_observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_observed_at = Some(at);
        self
    }
}

/// Which safety gate picked the activation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryChoice {
    /// Nothing buffered.
    Empty,
    /// `force_max_activation` with enough tokens left behind.
    ForcedOver,
    /// Closest boundary at or above target, within the overshoot margin.
    Over,
    /// Closest boundary below target, leaving enough tokens behind.
    Under,
    /// Over-boundary taken although it breaks a margin: better than nothing.
    OverLastResort,
    /// No usable boundary; activate exactly one chunk.
    SingleChunk,
}

impl BoundaryChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryChoice::Empty => "empty",
            BoundaryChoice::ForcedOver => "forced_over",
            BoundaryChoice::Over => "over",
            BoundaryChoice::Under => "under",
            BoundaryChoice::OverLastResort => "over_last_resort",
            BoundaryChoice::SingleChunk => "single_chunk",
        }
    }
}

impl std::fmt::Display for BoundaryChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate prefix: `chunks` consumed, freeing `message_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub chunks: usize,
    pub message_tokens: u64,
}

/// Outcome of boundary selection, before anything is mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationPlan {
    /// Number of leading chunks to activate.
    pub chunks_to_activate: usize,
    pub choice: BoundaryChoice,
    /// Ratio actually used after clamping into `[0, 1]`.
    pub activation_ratio: f64,
    pub retention_floor: f64,
    pub target_message_tokens: f64,
    pub max_overshoot: f64,
    pub min_remaining: f64,
    pub best_over: Option<Boundary>,
    pub best_under: Option<Boundary>,
}

/// Per-chunk breakdown of an activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivatedChunk {
    pub cycle_id: String,
    pub message_tokens: u64,
    pub observation_tokens: u64,
    pub message_count: usize,
    pub observations: String,
}

/// What an activation released.
///
/// `activated_message_ids` is for the caller to prune raw messages from
/// context. They are never added to the record's `observed_message_ids`:
/// upstream producers may reuse message ids, and a stale entry there would
/// block observation of new content under the same id forever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub chunks_activated: usize,
    pub message_tokens_activated: u64,
    pub observation_tokens_activated: u64,
    pub messages_activated: usize,
    pub activated_cycle_ids: Vec<String>,
    pub activated_message_ids: Vec<String>,
    /// Activated chunks' text joined with a blank line.
    pub observations: String,
    pub per_chunk: Vec<ActivatedChunk>,
    /// From the most recently activated chunk only.
    pub suggested_continuation: Option<String>,
    /// From the most recently activated chunk only.
    pub current_task: Option<String>,
}

fn clamp_ratio(ratio: f64) -> f64 {
    let used = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    if used != ratio {
        obs::emit_ratio_clamped(ratio, used);
    }
    used
}

/// Choose how many leading chunks to activate.
///
/// Walks every prefix boundary, tracking the smallest cumulative message
/// total at or above the target and the largest one strictly below it, then
/// applies the safety gates in order:
///
/// 1. forced, over exists, enough left behind → over
/// 2. over exists, overshoot within margin, enough left behind → over
/// 3. under exists, enough left behind → under
/// 4. over exists → over anyway
/// 5. otherwise → one chunk
pub fn plan_activation(
    chunks: &[BufferedObservationChunk],
    params: &ActivationParams,
) -> ActivationPlan {
    let ratio = clamp_ratio(params.activation_ratio);
    let pending = params.current_pending_tokens as f64;
    let retention_floor = params.message_tokens_threshold as f64 * (1.0 - ratio);
    let target = (pending - retention_floor).max(0.0);
    let max_overshoot = retention_floor * MAX_OVERSHOOT_FACTOR;
    let min_remaining = retention_floor.min(MIN_REMAINING_TOKENS);

    let mut plan = ActivationPlan {
        chunks_to_activate: 0,
        choice: BoundaryChoice::Empty,
        activation_ratio: ratio,
        retention_floor,
        target_message_tokens: target,
        max_overshoot,
        min_remaining,
        best_over: None,
        best_under: None,
    };
    if chunks.is_empty() {
        return plan;
    }

    let mut cumulative: u64 = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        cumulative = cumulative.saturating_add(chunk.message_tokens);
        let boundary = Boundary {
            chunks: i + 1,
            message_tokens: cumulative,
        };
        if cumulative as f64 >= target {
            if plan
                .best_over
                .map_or(true, |best| cumulative < best.message_tokens)
            {
                plan.best_over = Some(boundary);
            }
        } else if cumulative > plan.best_under.map_or(0, |best| best.message_tokens) {
            plan.best_under = Some(boundary);
        }
    }

    let leaves_enough = |b: &Boundary| pending - b.message_tokens as f64 >= min_remaining;
    let within_overshoot = |b: &Boundary| b.message_tokens as f64 - target <= max_overshoot;

    let (chunks_to_activate, choice) = if let Some(over) = plan
        .best_over
        .filter(|b| params.force_max_activation && leaves_enough(b))
    {
        (over.chunks, BoundaryChoice::ForcedOver)
    } else if let Some(over) = plan
        .best_over
        .filter(|b| within_overshoot(b) && leaves_enough(b))
    {
        (over.chunks, BoundaryChoice::Over)
    } else if let Some(under) = plan.best_under.filter(|b| leaves_enough(b)) {
        (under.chunks, BoundaryChoice::Under)
    } else if let Some(over) = plan.best_over {
        (over.chunks, BoundaryChoice::OverLastResort)
    } else {
        (1, BoundaryChoice::SingleChunk)
    };

    plan.chunks_to_activate = chunks_to_activate;
    plan.choice = choice;
    plan
}

/// Consume the planned prefix of `record`'s buffer and merge it into the
/// active fields. `now` is the cursor fallback when no chunk was activated
/// and no override is given.
pub fn apply_activation(
    record: &mut ObservationalMemoryRecord,
    plan: &ActivationPlan,
    last_observed_override: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ActivationResult {
    let take = plan
        .chunks_to_activate
        .min(record.buffered_observation_chunks.len());
    if take == 0 {
        return ActivationResult::default();
    }
    let activated: Vec<BufferedObservationChunk> =
        record.buffered_observation_chunks.drain(..take).collect();

    let observations = activated
        .iter()
        .map(|c| c.observations.as_str())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR);
    let observation_tokens: u64 = activated.iter().map(|c| c.token_count).sum();
    let message_tokens: u64 = activated.iter().map(|c| c.message_tokens).sum();

    record.active_observations = if record.active_observations.is_empty() {
        observations.clone()
    } else {
        format!("{}{BLOCK_SEPARATOR}{observations}", record.active_observations)
    };
    record.observation_token_count += observation_tokens;
    record.pending_message_tokens = record.pending_message_tokens.saturating_sub(message_tokens);

    let cursor = last_observed_override
        .or_else(|| activated.last().map(|c| c.last_observed_at))
        .unwrap_or(now);
    record.last_observed_at = ObservationCursor::ObservedAt(cursor);

    let newest = activated.last();
    ActivationResult {
        chunks_activated: activated.len(),
        message_tokens_activated: message_tokens,
        observation_tokens_activated: observation_tokens,
        messages_activated: activated.iter().map(|c| c.message_ids.len()).sum(),
        activated_cycle_ids: activated.iter().map(|c| c.cycle_id.clone()).collect(),
        activated_message_ids: activated
            .iter()
            .flat_map(|c| c.message_ids.iter().cloned())
            .collect(),
        observations,
        per_chunk: activated
            .iter()
            .map(|c| ActivatedChunk {
                cycle_id: c.cycle_id.clone(),
                message_tokens: c.message_tokens,
                observation_tokens: c.token_count,
                message_count: c.message_ids.len(),
                observations: c.observations.clone(),
            })
            .collect(),
        suggested_continuation: newest.and_then(|c| c.suggested_continuation.clone()),
        current_task: newest.and_then(|c| c.current_task.clone()),
    }
}

impl ObservationalMemory {
    /// Fold a prefix of the buffered chunks into active observations.
    ///
    /// With nothing buffered, returns an all-zero result and leaves the
    /// record untouched.
    #[instrument(skip_all, fields(record_id = %id))]
    pub async fn swap_buffered_to_active(
        &self,
        id: &RecordId,
        params: ActivationParams,
    ) -> OmResult<ActivationResult> {
        let mut record = self.load(id).await?;
        if record.buffered_observation_chunks.is_empty() {
            return Ok(ActivationResult::default());
        }

        let plan = plan_activation(&record.buffered_observation_chunks, &params);
        let result = apply_activation(&mut record, &plan, params.last_observed_at, Utc::now());
        let remaining = record.buffered_observation_chunks.len();
        self.save(record).await?;

        obs::emit_activated(
            id.as_str(),
            plan.choice.as_str(),
            result.chunks_activated,
            result.message_tokens_activated,
            remaining,
        );
        Ok(result)
    }

    /// Dry run: the plan `swap_buffered_to_active` would follow right now.
    pub async fn preview_activation(
        &self,
        id: &RecordId,
        params: &ActivationParams,
    ) -> OmResult<ActivationPlan> {
        let record = self.load(id).await?;
        Ok(plan_activation(&record.buffered_observation_chunks, params))
    }
}
