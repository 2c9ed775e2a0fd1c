//! # Hybrid Router
//!
//! Task router and lifecycle manager for code-generation work that can run
//! either on a local template executor or on a remote AI service.
//!
//! ## Task Flow
//! 1. Receive a task via the HTTP API or the command line
//! 2. Validate the kind and payload into a pending [`task::Task`]
//! 3. Route it with the [`routing::RoutingPolicy`] (local or remote)
//! 4. Execute on the chosen [`executor::Executor`] with timeout and retries
//! 5. Record the result or a classified failure on the task
//!
//! ## Modules
//! - `task`: Task model and lifecycle state machine
//! - `routing`: Estimators and the routing policy
//! - `executor`: Local and remote execution backends
//! - `coordinator`: Submission, concurrency limits, cancellation and batches
//! - `api`: HTTP interface
//! - `config`: Environment configuration
//! - `cli`: Command-line interface for the binary

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod routing;
pub mod task;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorError};
pub use routing::{RouteReason, RouteTarget, RoutingDecision, RoutingPolicy};
pub use task::{Task, TaskError, TaskId, TaskKind, TaskStatus};
