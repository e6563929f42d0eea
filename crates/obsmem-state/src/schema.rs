//! Record and chunk shapes for observational memory
//!
//! - `ObservationalMemoryRecord`: one generation of memory for a scope key
//! - `BufferedObservationChunk`: one observation cycle awaiting activation
//! - `ScopeKey`: the `(scope, thread|resource)` key generations are grouped by

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a memory record (one generation)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random RecordId
    pub fn new() -> Self {
        RecordId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

/// Whether a record tracks one thread or aggregates a resource's threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Thread,
    Resource,
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryScope::Thread => write!(f, "thread"),
            MemoryScope::Resource => write!(f, "resource"),
        }
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(MemoryScope::Thread),
            "resource" => Ok(MemoryScope::Resource),
            other => Err(format!("unknown memory scope: {other}")),
        }
    }
}

/// Key grouping every generation of one memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    Thread(String),
    Resource(String),
}

impl ScopeKey {
    /// Derive the key for a scope. `None` for thread scope without a
    /// thread id.
    pub fn for_scope(
        scope: MemoryScope,
        thread_id: Option<&str>,
        resource_id: &str,
    ) -> Option<Self> {
        match (scope, thread_id) {
            (MemoryScope::Thread, Some(thread_id)) => Some(ScopeKey::Thread(thread_id.to_string())),
            (MemoryScope::Thread, None) => None,
            (MemoryScope::Resource, _) => Some(ScopeKey::Resource(resource_id.to_string())),
        }
    }

    pub fn thread(thread_id: impl Into<String>) -> Self {
        ScopeKey::Thread(thread_id.into())
    }

    pub fn resource(resource_id: impl Into<String>) -> Self {
        ScopeKey::Resource(resource_id.into())
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKey::Thread(id) => write!(f, "thread:{id}"),
            ScopeKey::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}

/// How a generation came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    Initial,
    Reflection,
}

/// Boundary for "unobserved" messages.
///
/// `Unobserved` means nothing has been folded into an observation yet, so
/// every message for the key still counts as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "snake_case")]
pub enum ObservationCursor {
    #[default]
    Unobserved,
    ObservedAt(DateTime<Utc>),
}

impl ObservationCursor {
    pub fn as_option(&self) -> Option<DateTime<Utc>> {
        match self {
            ObservationCursor::Unobserved => None,
            ObservationCursor::ObservedAt(at) => Some(*at),
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, ObservationCursor::ObservedAt(_))
    }
}

impl From<Option<DateTime<Utc>>> for ObservationCursor {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(at) => ObservationCursor::ObservedAt(at),
            None => ObservationCursor::Unobserved,
        }
    }
}

/// One of the four advisory in-flight flags on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFlag {
    Observing,
    Reflecting,
    BufferingObservation,
    BufferingReflection,
}

impl RecordFlag {
    pub const ALL: [RecordFlag; 4] = [
        RecordFlag::Observing,
        RecordFlag::Reflecting,
        RecordFlag::BufferingObservation,
        RecordFlag::BufferingReflection,
    ];

    /// Field name of the flag on a serialized record.
    pub fn field_name(&self) -> &'static str {
        match self {
            RecordFlag::Observing => "is_observing",
            RecordFlag::Reflecting => "is_reflecting",
            RecordFlag::BufferingObservation => "is_buffering_observation",
            RecordFlag::BufferingReflection => "is_buffering_reflection",
        }
    }
}

impl std::fmt::Display for RecordFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Chunk content submitted by the caller, before the store assigns
/// an id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservationChunk {
    /// Observation cycle this chunk belongs to (UI correlation)
    pub cycle_id: String,
    /// Observation text produced by the observer
    pub observations: String,
    /// Tokens in `observations`
    pub token_count: u64,
    /// Raw messages this chunk summarizes
    pub message_ids: Vec<String>,
    /// Tokens in the raw messages, freed on activation
    pub message_tokens: u64,
    pub last_observed_at: DateTime<Utc>,
    #[serde(default)]
    pub suggested_continuation: Option<String>,
    #[serde(default)]
    pub current_task: Option<String>,
}

impl NewObservationChunk {
    pub fn into_chunk(self) -> BufferedObservationChunk {
        BufferedObservationChunk {
            id: Uuid::new_v4().to_string(),
            cycle_id: self.cycle_id,
            observations: self.observations,
            token_count: self.token_count,
            message_ids: self.message_ids,
            message_tokens: self.message_tokens,
            last_observed_at: self.last_observed_at,
            created_at: Utc::now(),
            suggested_continuation: self.suggested_continuation,
            current_task: self.current_task,
        }
    }
}

/// One buffered observation cycle awaiting activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedObservationChunk {
    pub id: String,
    pub cycle_id: String,
    pub observations: String,
    pub token_count: u64,
    pub message_ids: Vec<String>,
    pub message_tokens: u64,
    pub last_observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub suggested_continuation: Option<String>,
    #[serde(default)]
    pub current_task: Option<String>,
}

/// One generation of observational memory for a scope key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationalMemoryRecord {
    pub id: RecordId,
    pub scope: MemoryScope,
    /// `None` for resource-scoped records
    pub thread_id: Option<String>,
    pub resource_id: String,

    pub origin_type: OriginType,
    pub generation_count: u64,

    /// Line-oriented active text; newline is the reflection granularity
    pub active_observations: String,
    /// Oldest first
    #[serde(default)]
    pub buffered_observation_chunks: Vec<BufferedObservationChunk>,

    pub buffered_reflection: Option<String>,
    pub buffered_reflection_tokens: Option<u64>,
    pub buffered_reflection_input_tokens: Option<u64>,
    /// Leading lines of `active_observations` the buffered reflection covers
    pub reflected_observation_line_count: Option<usize>,

    pub total_tokens_observed: u64,
    pub observation_token_count: u64,
    pub pending_message_tokens: u64,

    pub last_observed_at: ObservationCursor,
    pub last_buffered_at_time: Option<DateTime<Utc>>,
    pub last_buffered_at_tokens: u64,

    pub is_observing: bool,
    pub is_reflecting: bool,
    pub is_buffering_observation: bool,
    pub is_buffering_reflection: bool,

    /// Caller-owned policy knobs, stored opaquely
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub observed_message_ids: Vec<String>,
    pub observed_timezone: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObservationalMemoryRecord {
    /// Create a generation-0 record with nothing observed or buffered
    pub fn new_initial(
        scope: MemoryScope,
        thread_id: Option<String>,
        resource_id: String,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let thread_id = match scope {
            MemoryScope::Thread => thread_id,
            MemoryScope::Resource => None,
        };
        ObservationalMemoryRecord {
            id: RecordId::new(),
            scope,
            thread_id,
            resource_id,
            origin_type: OriginType::Initial,
            generation_count: 0,
            active_observations: String::new(),
            buffered_observation_chunks: Vec::new(),
            buffered_reflection: None,
            buffered_reflection_tokens: None,
            buffered_reflection_input_tokens: None,
            reflected_observation_line_count: None,
            total_tokens_observed: 0,
            observation_token_count: 0,
            pending_message_tokens: 0,
            last_observed_at: ObservationCursor::Unobserved,
            last_buffered_at_time: None,
            last_buffered_at_tokens: 0,
            is_observing: false,
            is_reflecting: false,
            is_buffering_observation: false,
            is_buffering_reflection: false,
            config,
            observed_message_ids: Vec::new(),
            observed_timezone: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Key this record's generations are grouped under.
    ///
    /// Initialization refuses thread scope without a thread id, so the
    /// resource fallback only covers hand-built records.
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::for_scope(self.scope, self.thread_id.as_deref(), &self.resource_id)
            .unwrap_or_else(|| ScopeKey::Resource(self.resource_id.clone()))
    }

    pub fn flag(&self, flag: RecordFlag) -> bool {
        match flag {
            RecordFlag::Observing => self.is_observing,
            RecordFlag::Reflecting => self.is_reflecting,
            RecordFlag::BufferingObservation => self.is_buffering_observation,
            RecordFlag::BufferingReflection => self.is_buffering_reflection,
        }
    }

    pub fn set_flag(&mut self, flag: RecordFlag, value: bool) {
        match flag {
            RecordFlag::Observing => self.is_observing = value,
            RecordFlag::Reflecting => self.is_reflecting = value,
            RecordFlag::BufferingObservation => self.is_buffering_observation = value,
            RecordFlag::BufferingReflection => self.is_buffering_reflection = value,
        }
    }

    /// Number of newline-separated lines in the active text
    pub fn active_line_count(&self) -> usize {
        if self.active_observations.is_empty() {
            0
        } else {
            self.active_observations.split('\n').count()
        }
    }

    pub fn has_buffered_reflection(&self) -> bool {
        self.buffered_reflection
            .as_deref()
            .is_some_and(|r| !r.is_empty())
    }

    /// Drop the four buffered-reflection staging fields
    pub fn clear_buffered_reflection(&mut self) {
        self.buffered_reflection = None;
        self.buffered_reflection_tokens = None;
        self.buffered_reflection_input_tokens = None;
        self.reflected_observation_line_count = None;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_display() {
        assert_eq!(ScopeKey::thread("t-1").to_string(), "thread:t-1");
        assert_eq!(ScopeKey::resource("r-1").to_string(), "resource:r-1");
    }

    #[test]
    fn test_scope_key_for_scope() {
        assert_eq!(
            ScopeKey::for_scope(MemoryScope::Thread, Some("t"), "r"),
            Some(ScopeKey::thread("t"))
        );
        assert_eq!(
            ScopeKey::for_scope(MemoryScope::Resource, Some("t"), "r"),
            Some(ScopeKey::resource("r"))
        );
        assert_eq!(ScopeKey::for_scope(MemoryScope::Thread, None, "r"), None);
    }

    #[test]
    fn test_missing_config_reads_as_null() {
        let rec = ObservationalMemoryRecord::new_initial(
            MemoryScope::Thread,
            Some("t".to_string()),
            "r".to_string(),
            serde_json::Value::Null,
        );
        let mut json = serde_json::to_value(&rec).unwrap();
        json.as_object_mut().unwrap().remove("config");
        let back: ObservationalMemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_new_initial_resource_scope_drops_thread_id() {
        let rec = ObservationalMemoryRecord::new_initial(
            MemoryScope::Resource,
            Some("t-1".to_string()),
            "r-1".to_string(),
            serde_json::json!({}),
        );
        assert_eq!(rec.thread_id, None);
        assert_eq!(rec.generation_count, 0);
        assert_eq!(rec.origin_type, OriginType::Initial);
        assert_eq!(rec.last_observed_at, ObservationCursor::Unobserved);
        assert_eq!(rec.scope_key(), ScopeKey::resource("r-1"));
    }

    #[test]
    fn test_active_line_count() {
        let mut rec = ObservationalMemoryRecord::new_initial(
            MemoryScope::Thread,
            Some("t".to_string()),
            "r".to_string(),
            serde_json::Value::Null,
        );
        assert_eq!(rec.active_line_count(), 0);
        rec.active_observations = "a\nb\n\nc".to_string();
        assert_eq!(rec.active_line_count(), 4);
    }

    #[test]
    fn test_flag_accessors() {
        let mut rec = ObservationalMemoryRecord::new_initial(
            MemoryScope::Thread,
            Some("t".to_string()),
            "r".to_string(),
            serde_json::Value::Null,
        );
        for flag in RecordFlag::ALL {
            assert!(!rec.flag(flag));
            rec.set_flag(flag, true);
            assert!(rec.flag(flag));
        }
        assert!(rec.is_observing && rec.is_reflecting);
        assert!(rec.is_buffering_observation && rec.is_buffering_reflection);
    }

    #[test]
    fn test_cursor_serde_is_explicit() {
        let json = serde_json::to_value(ObservationCursor::Unobserved).unwrap();
        assert_eq!(json, serde_json::json!({"state": "unobserved"}));

        let at = Utc::now();
        let cursor = ObservationCursor::from(Some(at));
        let back: ObservationCursor =
            serde_json::from_value(serde_json::to_value(cursor).unwrap()).unwrap();
        assert_eq!(back.as_option(), Some(at));
    }

    #[test]
    fn test_has_buffered_reflection_ignores_empty() {
        let mut rec = ObservationalMemoryRecord::new_initial(
            MemoryScope::Thread,
            Some("t".to_string()),
            "r".to_string(),
            serde_json::Value::Null,
        );
        assert!(!rec.has_buffered_reflection());
        rec.buffered_reflection = Some(String::new());
        assert!(!rec.has_buffered_reflection());
        rec.buffered_reflection = Some("summary".to_string());
        assert!(rec.has_buffered_reflection());
    }
}
