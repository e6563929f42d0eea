//! obsmem-core: the observational memory engine
//!
//! Keeps an agent's long-running context bounded. Raw conversation is
//! condensed into observations in the background, buffered observations are
//! activated in safe batches, and accumulated observations are reflected
//! into fresh generations.
//!
//! ## Layer 1 - Memory Engine
//!
//! Every operation is a read-modify-write over an injected
//! [`obsmem_state::RecordStore`]. The engine holds no state of its own.

pub mod activation;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod obs;
pub mod reflection;
pub mod telemetry;

pub use activation::{
    apply_activation, plan_activation, ActivatedChunk, ActivationParams, ActivationPlan,
    ActivationResult, Boundary, BoundaryChoice,
};
pub use buffering::BufferedReflectionUpdate;
pub use config::ObservationConfig;
pub use engine::{ActiveObservationsUpdate, ObservationalMemory};
pub use error::{OmError, OmResult};
pub use reflection::merge_reflection;
pub use telemetry::init_tracing;

pub use obsmem_state::{
    BufferedObservationChunk, MemoryScope, NewObservationChunk, ObservationCursor,
    ObservationalMemoryRecord, OriginType, RecordFlag, RecordId, RecordStore, ScopeKey,
};
