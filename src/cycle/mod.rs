//! The `SENSE -> THINK -> FEEL -> DECIDE -> LEARN -> PERSIST` cognitive
//! cycle (§4.1-4.2) and the scheduler that drives it.

pub mod engine;
pub mod scheduler;

pub use engine::{CycleEngine, EngineMetrics};
pub use scheduler::Scheduler;
