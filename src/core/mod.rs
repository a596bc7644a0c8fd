//! The working-state object and the closed-set data model it is built
//! from.

pub mod emotion;
pub mod error;
pub mod ids;
pub mod memory_types;
pub mod pattern_types;
pub mod state;

pub use emotion::Emotion;
pub use error::CoreError;
pub use ids::{AgentId, CycleCount, MemoryId, PatternId, PoolId};
pub use memory_types::{Memory, MemoryCategory, MemoryMetadata, MemoryRef, TtlPolicy};
pub use pattern_types::{Pattern, PatternKind};
pub use state::{
    ConsciousnessState, CostLedgerEntry, CostService, Decision, DecisionKind, PoolObservation,
    WORKING_MEMORY_CAP,
};
