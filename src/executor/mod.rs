//! Execution backends.
//!
//! The coordinator hands a running task to one of two backends:
//! - **LocalExecutor**: template-driven generation and static checks in-process
//! - **RemoteExecutor**: HTTP calls to the remote AI service
//!
//! Both expose a single `execute` operation. Timeouts and retries are applied
//! by the coordinator, not by the backends.

mod cache;
mod error;
mod local;
mod remote;

pub use error::{classify_http_status, ExecutorError, ExecutorErrorKind};
pub use local::LocalExecutor;
pub use remote::RemoteExecutor;

use async_trait::async_trait;

use crate::task::Task;

/// A backend capable of executing tasks.
///
/// # Contract
/// - `execute` never mutates coordinator state; it only reads the task
/// - Retryable failures use a transient [`ExecutorErrorKind`]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Execute a task and return its result document.
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, ExecutorError>;
}
