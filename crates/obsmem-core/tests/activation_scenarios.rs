//! Activation scenarios driven through the engine against the in-memory store.

use chrono::{Duration, Utc};
use obsmem_core::{
    ActivationParams, ActiveObservationsUpdate, BoundaryChoice, MemoryScope, NewObservationChunk,
    ObservationCursor, ObservationalMemory, ObservationalMemoryRecord,
};

fn chunk(cycle: &str, message_tokens: u64) -> NewObservationChunk {
    NewObservationChunk {
        cycle_id: cycle.to_string(),
        observations: format!("- {cycle}"),
        token_count: message_tokens / 10,
        message_ids: vec![format!("{cycle}-m1"), format!("{cycle}-m2")],
        message_tokens,
        last_observed_at: Utc::now(),
        suggested_continuation: Some(format!("after {cycle}")),
        current_task: None,
    }
}

async fn buffered_memory(
    om: &ObservationalMemory,
    thread: &str,
    pending: u64,
    message_tokens: &[u64],
) -> ObservationalMemoryRecord {
    let rec = om
        .initialize_observational_memory(
            Some(thread),
            "resource-1",
            MemoryScope::Thread,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    om.set_pending_message_tokens(&rec.id, pending).await.unwrap();
    for (i, tokens) in message_tokens.iter().enumerate() {
        om.update_buffered_observations(&rec.id, chunk(&format!("c{}", i + 1), *tokens), None)
            .await
            .unwrap();
    }
    om.get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_boundary_safety_keeps_retention_floor() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-a", 6000, &[2000, 2000, 2000]).await;

    let params = ActivationParams::new(0.8, 5000, 6000);
    let plan = om.preview_activation(&rec.id, &params).await.unwrap();
    assert_eq!(plan.choice, BoundaryChoice::Under);
    assert_eq!(plan.chunks_to_activate, 2);

    let result = om.swap_buffered_to_active(&rec.id, params).await.unwrap();
    assert_eq!(result.chunks_activated, 2);
    assert_eq!(result.message_tokens_activated, 4000);
    assert_eq!(result.activated_cycle_ids, vec!["c1", "c2"]);
    assert_eq!(result.suggested_continuation.as_deref(), Some("after c2"));

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.pending_message_tokens, 2000);
    assert_eq!(after.active_observations, "- c1\n\n- c2");
    assert_eq!(after.observation_token_count, 400);
    assert_eq!(after.buffered_observation_chunks.len(), 1);
    assert_eq!(after.buffered_observation_chunks[0].cycle_id, "c3");
}

#[tokio::test]
async fn test_token_conservation_on_normal_gates() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-cons", 6000, &[2000, 2000, 2000]).await;

    let result = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(0.8, 5000, 6000))
        .await
        .unwrap();
    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        after.pending_message_tokens + result.message_tokens_activated,
        6000
    );
}

#[tokio::test]
async fn test_zero_buffer_leaves_record_untouched() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-b", 500, &[]).await;
    om.update_active_observations(
        &rec.id,
        ActiveObservationsUpdate {
            observations: "- existing".to_string(),
            token_count: 3,
            last_observed_at: Utc::now(),
            observed_message_ids: None,
        },
    )
    .await
    .unwrap();
    let before = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();

    let result = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(0.8, 5000, 500))
        .await
        .unwrap();
    assert_eq!(result.chunks_activated, 0);
    assert_eq!(result.message_tokens_activated, 0);
    assert_eq!(result.observation_tokens_activated, 0);
    assert_eq!(result.messages_activated, 0);
    assert!(result.observations.is_empty());

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_full_ratio_activates_to_zero_remaining() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-c", 3000, &[1000, 1000, 1000]).await;

    let result = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(1.0, 5000, 3000))
        .await
        .unwrap();
    assert_eq!(result.chunks_activated, 3);

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.pending_message_tokens, 0);
    assert!(after.buffered_observation_chunks.is_empty());
}

#[tokio::test]
async fn test_chunks_are_consumed_oldest_first() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-fifo", 6000, &[2000, 2000, 2000]).await;

    let first = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(0.8, 5000, 6000))
        .await
        .unwrap();
    let second = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(0.8, 5000, 2000))
        .await
        .unwrap();

    assert_eq!(first.activated_cycle_ids, vec!["c1", "c2"]);
    assert_eq!(second.activated_cycle_ids, vec!["c3"]);

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.active_observations, "- c1\n\n- c2\n\n- c3");
    assert_eq!(after.pending_message_tokens, 0);
}

#[tokio::test]
async fn test_activated_message_ids_never_join_safeguard_list() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-ids", 0, &[]).await;
    om.update_active_observations(
        &rec.id,
        ActiveObservationsUpdate {
            observations: "- seed".to_string(),
            token_count: 2,
            last_observed_at: Utc::now(),
            observed_message_ids: Some(vec!["m-0".to_string()]),
        },
    )
    .await
    .unwrap();
    om.set_pending_message_tokens(&rec.id, 3000).await.unwrap();
    om.update_buffered_observations(&rec.id, chunk("c1", 3000), None)
        .await
        .unwrap();

    let result = om
        .swap_buffered_to_active(&rec.id, ActivationParams::new(1.0, 5000, 3000))
        .await
        .unwrap();
    assert_eq!(result.activated_message_ids, vec!["c1-m1", "c1-m2"]);
    assert_eq!(result.messages_activated, 2);

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.observed_message_ids, vec!["m-0".to_string()]);
}

#[tokio::test]
async fn test_cursor_override_wins_over_chunk_timestamp() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-cursor", 1000, &[1000]).await;
    let override_at = Utc::now() + Duration::minutes(5);

    om.swap_buffered_to_active(
        &rec.id,
        ActivationParams::new(1.0, 5000, 1000).with_last_observed_at(override_at),
    )
    .await
    .unwrap();

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.last_observed_at, ObservationCursor::ObservedAt(override_at));
}

#[tokio::test]
async fn test_buffering_does_not_touch_active_state() {
    let om = ObservationalMemory::in_memory();
    let rec = buffered_memory(&om, "t-buf", 750, &[]).await;
    let at = Utc::now();

    let stored = om
        .update_buffered_observations(&rec.id, chunk("c1", 700), Some(at))
        .await
        .unwrap();
    assert!(!stored.id.is_empty());

    let after = om
        .get_observational_memory_by_id(&rec.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.buffered_observation_chunks, vec![stored]);
    assert_eq!(after.last_buffered_at_time, Some(at));
    assert!(after.active_observations.is_empty());
    assert_eq!(after.pending_message_tokens, 750);
    assert_eq!(after.observation_token_count, 0);
    assert_eq!(after.last_observed_at, ObservationCursor::Unobserved);
}
