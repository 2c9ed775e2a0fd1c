//! Core Task type and its guarded lifecycle.
//!
//! # Invariants
//! - `id` is assigned once at construction and never reused
//! - `result.is_some()` iff `status == Completed`
//! - `error.is_some()` iff `status == Failed`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::{TaskKind, TaskPayload};
use crate::routing::RouteTarget;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within the process
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Running -> Completed
///        \          \-> Failed
///         \-> Failed (cancelled only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `true` if the task is Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `true` if the task is Pending or Running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified reason a task ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The executor did not answer within the request timeout
    Timeout,
    /// The executor refused the task with a non-retryable error
    Rejected,
    /// Transient errors persisted past the retry bound
    BackendExhausted,
    /// The task was cancelled before it finished
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::BackendExhausted => "backend-exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure recorded on a task: a classification plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl TaskFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            FailureReason::Timeout,
            format!("Execution did not finish within {:.1}s", after.as_secs_f64()),
        )
    }

    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::new(
            FailureReason::Rejected,
            format!("Backend rejected the task: {}", message),
        )
    }

    pub fn exhausted(attempts: u32, last_error: impl std::fmt::Display) -> Self {
        Self::new(
            FailureReason::BackendExhausted,
            format!(
                "Backend still failing after {} attempts: {}",
                attempts, last_error
            ),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "Task was cancelled")
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Lifecycle event applied through [`Task::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Start,
    Succeed(serde_json::Value),
    Fail(TaskFailure),
}

impl TaskEvent {
    fn name(&self) -> &'static str {
        match self {
            TaskEvent::Start => "start",
            TaskEvent::Succeed(_) => "succeed",
            TaskEvent::Fail(_) => "fail",
        }
    }
}

/// Outcome of a successful [`Task::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The task moved to a new state
    Applied,
    /// Duplicate delivery of an event already reflected in the state
    Ignored,
}

/// A unit of requested work.
///
/// Tasks are only built through [`Task::new`] and cannot be deserialized:
///
/// ```compile_fail
/// let task: hybrid_router::Task = serde_json::from_str("{}").unwrap();
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    payload: TaskPayload,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<TaskFailure>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// Where the task was dispatched (observational)
    target: Option<RouteTarget>,
    /// Executor dispatches made so far (observational)
    attempts: u32,
}

impl Task {
    /// Create a new pending task.
    ///
    /// # Errors
    /// Returns `TaskError::Validation` if the payload does not fit the kind.
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Result<Self, TaskError> {
        let payload = TaskPayload::validate(kind, payload)?;
        Ok(Self {
            id: TaskId::new(),
            kind,
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            target: None,
            attempts: 0,
        })
    }

    /// Create a task from an untyped kind name, as received over the wire.
    pub fn from_request(kind: &str, payload: serde_json::Value) -> Result<Self, TaskError> {
        Self::new(TaskKind::parse(kind)?, payload)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&TaskFailure> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn target(&self) -> Option<RouteTarget> {
        self.target
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn set_target(&mut self, target: RouteTarget) {
        self.target = Some(target);
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Apply a lifecycle event, stamping transitions with the current time.
    pub fn advance(&mut self, event: TaskEvent) -> Result<Transition, TaskError> {
        self.advance_at(event, Utc::now())
    }

    /// Apply a lifecycle event.
    ///
    /// # Postconditions
    /// - On `Ok(Applied)` the task moved along
    ///   `pending -> running -> {completed | failed}` or `pending -> failed(cancelled)`
    /// - On `Ok(Ignored)` or `Err(_)` the task is unchanged
    pub fn advance_at(
        &mut self,
        event: TaskEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, TaskError> {
        match (self.status, event) {
            (TaskStatus::Pending, TaskEvent::Start) => {
                self.status = TaskStatus::Running;
                self.started_at = Some(now);
                Ok(Transition::Applied)
            }
            (TaskStatus::Running, TaskEvent::Succeed(result)) => {
                self.status = TaskStatus::Completed;
                self.result = Some(result);
                self.completed_at = Some(now);
                Ok(Transition::Applied)
            }
            (TaskStatus::Running, TaskEvent::Fail(failure)) => {
                self.status = TaskStatus::Failed;
                self.error = Some(failure);
                self.completed_at = Some(now);
                Ok(Transition::Applied)
            }
            (TaskStatus::Pending, TaskEvent::Fail(failure))
                if failure.reason == FailureReason::Cancelled =>
            {
                self.status = TaskStatus::Failed;
                self.error = Some(failure);
                self.completed_at = Some(now);
                Ok(Transition::Applied)
            }
            // At-least-once delivery from upstream
            (TaskStatus::Running, TaskEvent::Start)
            | (TaskStatus::Completed, TaskEvent::Succeed(_))
            | (TaskStatus::Failed, TaskEvent::Fail(_)) => Ok(Transition::Ignored),
            (from, event) => Err(TaskError::InvalidTransition {
                from,
                event: event.name(),
            }),
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot apply '{event}' to a {from} task")]
    InvalidTransition { from: TaskStatus, event: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn generation_task() -> Task {
        Task::new(TaskKind::Generation, json!({"prompt": "sort list"})).unwrap()
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = generation_task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.result().is_none());
        assert!(task.error().is_none());
        assert!(task.started_at().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generation_task();
        let b = generation_task();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Task::from_request("translation", json!({"prompt": "x"})).unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_happy_path() {
        let mut task = generation_task();
        assert_eq!(task.advance(TaskEvent::Start), Ok(Transition::Applied));
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.started_at().is_some());

        let result = json!({"code": "sorted(xs)", "confidence": 0.95});
        assert_eq!(
            task.advance(TaskEvent::Succeed(result.clone())),
            Ok(Transition::Applied)
        );
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some(&result));
        assert!(task.completed_at().is_some());
    }

    #[test]
    fn test_succeed_on_pending_is_invalid() {
        let mut task = generation_task();
        let before = task.clone();
        let err = task.advance(TaskEvent::Succeed(json!({}))).unwrap_err();
        assert_eq!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Pending,
                event: "succeed"
            }
        );
        assert_eq!(task.status(), before.status());
        assert!(task.result().is_none());
    }

    #[test]
    fn test_duplicate_succeed_is_noop() {
        let mut task = generation_task();
        task.advance(TaskEvent::Start).unwrap();
        task.advance(TaskEvent::Succeed(json!({"code": "a"}))).unwrap();
        let completed_at = task.completed_at();

        assert_eq!(
            task.advance(TaskEvent::Succeed(json!({"code": "b"}))),
            Ok(Transition::Ignored)
        );
        assert_eq!(task.result(), Some(&json!({"code": "a"})));
        assert_eq!(task.completed_at(), completed_at);
    }

    #[test]
    fn test_conflicting_terminal_event_rejected() {
        let mut task = generation_task();
        task.advance(TaskEvent::Start).unwrap();
        task.advance(TaskEvent::Fail(TaskFailure::timeout(
            std::time::Duration::from_secs(1),
        )))
        .unwrap();

        assert!(task.advance(TaskEvent::Succeed(json!({}))).is_err());
        assert!(task.advance(TaskEvent::Start).is_err());
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.result().is_none());
    }

    #[test]
    fn test_pending_can_only_fail_by_cancellation() {
        let mut task = generation_task();
        assert!(task
            .advance(TaskEvent::Fail(TaskFailure::rejected("bad payload")))
            .is_err());
        assert_eq!(task.status(), TaskStatus::Pending);

        assert_eq!(
            task.advance(TaskEvent::Fail(TaskFailure::cancelled())),
            Ok(Transition::Applied)
        );
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error().unwrap().reason, FailureReason::Cancelled);
        assert!(task.started_at().is_none());
    }

    fn random_event(rng: &mut StdRng) -> TaskEvent {
        match rng.gen_range(0..6) {
            0 | 1 => TaskEvent::Start,
            2 => TaskEvent::Succeed(json!({"n": rng.gen::<u32>()})),
            3 => TaskEvent::Fail(TaskFailure::cancelled()),
            4 => TaskEvent::Fail(TaskFailure::rejected("nope")),
            _ => TaskEvent::Fail(TaskFailure::exhausted(3, "503")),
        }
    }

    fn allowed(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Pending, Failed)
        )
    }

    #[test]
    fn test_random_event_sequences_follow_state_machine() {
        for seed in 0..500u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut task = generation_task();
            let len = rng.gen_range(1..12);

            for _ in 0..len {
                let before = task.clone();
                let event = random_event(&mut rng);
                match task.advance(event) {
                    Ok(Transition::Applied) => {
                        assert!(
                            allowed(before.status(), task.status()),
                            "seed {}: illegal move {} -> {}",
                            seed,
                            before.status(),
                            task.status()
                        );
                    }
                    Ok(Transition::Ignored) | Err(_) => {
                        assert_eq!(before.status(), task.status(), "seed {}", seed);
                        assert_eq!(before.result(), task.result(), "seed {}", seed);
                        assert_eq!(before.error(), task.error(), "seed {}", seed);
                    }
                }

                match task.status() {
                    TaskStatus::Completed => {
                        assert!(task.result().is_some() && task.error().is_none())
                    }
                    TaskStatus::Failed => {
                        assert!(task.error().is_some() && task.result().is_none())
                    }
                    TaskStatus::Pending | TaskStatus::Running => {
                        assert!(task.result().is_none() && task.error().is_none())
                    }
                }
            }
        }
    }

    #[test]
    fn test_snapshot_serialization() {
        let task = generation_task();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["kind"], "generation");
        assert_eq!(value["payload"]["prompt"], "sort list");
        assert!(value["result"].is_null());
    }
}
