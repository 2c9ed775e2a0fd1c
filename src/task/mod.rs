//! Task module - the unit of work and its lifecycle.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Payload invariants are enforced when a task is constructed
//! - State changes go through one guarded transition function

mod payload;
pub mod task;

pub use payload::{
    ComplexityHint, OptimizationTarget, TaskKind, TaskPayload, DEFAULT_LANGUAGE,
    SUPPORTED_LANGUAGES,
};
pub use task::{
    FailureReason, Task, TaskError, TaskEvent, TaskFailure, TaskId, TaskStatus, Transition,
};
