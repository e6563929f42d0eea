//! Structured observability hooks for the memory record lifecycle.
//!
//! One emission function per lifecycle event. Record-scoped spans come from
//! `#[instrument]` on the engine operations, so events inherit `record_id`.
//!
//! Events are emitted at `info!` level (filterable via `RUST_LOG`).

use tracing::{info, warn};

/// Emit event: generation-0 record created for a key.
pub fn emit_initialized(record_id: &str, scope_key: &str) {
    info!(event = "om.initialized", record_id = %record_id, scope_key = %scope_key);
}

/// Emit event: an observation chunk was appended to the buffer.
pub fn emit_chunk_buffered(
    record_id: &str,
    cycle_id: &str,
    message_tokens: u64,
    buffered_chunks: usize,
) {
    info!(
        event = "om.chunk_buffered",
        record_id = %record_id,
        cycle_id = %cycle_id,
        message_tokens = message_tokens,
        buffered_chunks = buffered_chunks,
    );
}

/// Emit event: buffered chunks folded into active observations.
pub fn emit_activated(
    record_id: &str,
    boundary: &str,
    chunks_activated: usize,
    message_tokens_activated: u64,
    remaining_chunks: usize,
) {
    info!(
        event = "om.activated",
        record_id = %record_id,
        boundary = %boundary,
        chunks_activated = chunks_activated,
        message_tokens_activated = message_tokens_activated,
        remaining_chunks = remaining_chunks,
    );
}

/// Emit event: reflection text staged against a line boundary.
pub fn emit_reflection_buffered(record_id: &str, total_tokens: u64, reflected_line_count: usize) {
    info!(
        event = "om.reflection_buffered",
        record_id = %record_id,
        buffered_reflection_tokens = total_tokens,
        reflected_line_count = reflected_line_count,
    );
}

/// Emit event: a new generation became the head of its key.
pub fn emit_generation_created(previous_id: &str, record_id: &str, generation: u64) {
    info!(
        event = "om.generation_created",
        previous_id = %previous_id,
        record_id = %record_id,
        generation = generation,
    );
}

/// Emit event: an in-flight flag changed.
pub fn emit_flag_changed(record_id: &str, flag: &str, value: bool) {
    info!(event = "om.flag_changed", record_id = %record_id, flag = %flag, value = value);
}

/// Emit event: every generation of a key removed.
pub fn emit_cleared(scope_key: &str, removed: usize) {
    info!(event = "om.cleared", scope_key = %scope_key, removed = removed);
}

/// Emit event: an activation ratio outside `[0, 1]` was clamped (warning level).
pub fn emit_ratio_clamped(given: f64, used: f64) {
    warn!(event = "om.ratio_clamped", given = given, used = used);
}
