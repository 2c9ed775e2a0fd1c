//! Task execution coordinator.
//!
//! Accepts tasks, routes them through the [`RoutingPolicy`] and drives them to
//! a terminal state on a bounded pool of tokio tasks.
//!
//! # Concurrency
//! - A `Semaphore` with `worker_threads` permits bounds executions in flight
//! - Every status change goes through [`Task::advance`] under the table's write lock
//! - Each entry owns a `CancellationToken` and a `watch` channel of its status
//!
//! # Failure handling
//! - Each executor call is bounded by `request_timeout`; elapsed calls fail the task
//!   with `timeout` and are not retried
//! - Transient errors are retried up to `max_retries` times with linear backoff
//! - Permanent errors and executor panics fail the task with `rejected`

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError, ExecutionConfig};
use crate::executor::{Executor, LocalExecutor, RemoteExecutor};
use crate::routing::{RouteTarget, RoutingPolicy};
use crate::task::{Task, TaskError, TaskEvent, TaskFailure, TaskId, TaskStatus, Transition};

/// Errors returned synchronously by coordinator operations.
///
/// Failures that happen while a task executes are recorded on the task
/// itself as a [`TaskFailure`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Batch of {size} tasks exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Per-status task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

struct Inner {
    policy: RoutingPolicy,
    local: Arc<dyn Executor>,
    remote: Arc<dyn Executor>,
    config: ExecutionConfig,
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    permits: Arc<Semaphore>,
}

/// Shared handle to the task table and worker pool. Cloning is cheap.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        policy: RoutingPolicy,
        local: Arc<dyn Executor>,
        remote: Arc<dyn Executor>,
        config: ExecutionConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_threads.max(1)));
        Self {
            inner: Arc::new(Inner {
                policy,
                local,
                remote,
                config,
                tasks: RwLock::new(HashMap::new()),
                permits,
            }),
        }
    }

    /// Build a coordinator with the built-in executors.
    ///
    /// Without a remote endpoint the local executor also serves remote-routed tasks.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.execution.validate()?;
        config.remote.validate()?;
        let policy = RoutingPolicy::new(config.routing.clone())?;

        let local: Arc<dyn Executor> = Arc::new(LocalExecutor::new());
        let remote: Arc<dyn Executor> = match &config.remote.endpoint {
            Some(endpoint) => {
                tracing::info!(
                    endpoint = %endpoint,
                    cache = config.remote.cache_enabled,
                    "Remote executor configured"
                );
                let executor =
                    RemoteExecutor::new(endpoint.clone(), config.remote.api_key.clone());
                if config.remote.cache_enabled {
                    Arc::new(executor.with_cache(
                        config.remote.cache_ttl,
                        config.remote.max_cache_size,
                    ))
                } else {
                    Arc::new(executor)
                }
            }
            None => {
                tracing::warn!(
                    "REMOTE_ENDPOINT not set; remote-routed tasks will run on the local executor"
                );
                Arc::clone(&local)
            }
        };

        Ok(Self::new(policy, local, remote, config.execution.clone()))
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.inner.policy
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    /// Store a pending task and start executing it in the background.
    ///
    /// Returns as soon as the task is stored.
    pub async fn submit(&self, task: Task) -> Result<TaskId, CoordinatorError> {
        let id = task.id();
        self.admit(vec![task]).await?;
        Ok(id)
    }

    /// Validate and store tasks as one unit, then spawn their drivers.
    ///
    /// Either every task is stored or none is.
    async fn admit(&self, tasks: Vec<Task>) -> Result<Vec<TaskId>, CoordinatorError> {
        let mut ids: Vec<TaskId> = Vec::with_capacity(tasks.len());
        let mut started = Vec::with_capacity(tasks.len());
        {
            let mut table = self.inner.tasks.write().await;
            for task in &tasks {
                if task.status() != TaskStatus::Pending {
                    return Err(TaskError::Validation(format!(
                        "Only pending tasks can be submitted, task {} is {}",
                        task.id(),
                        task.status()
                    ))
                    .into());
                }
                if table.contains_key(&task.id()) {
                    return Err(TaskError::Validation(format!(
                        "Task {} was already submitted",
                        task.id()
                    ))
                    .into());
                }
                if ids.contains(&task.id()) {
                    return Err(TaskError::Validation(format!(
                        "Task {} appears more than once in the batch",
                        task.id()
                    ))
                    .into());
                }
                ids.push(task.id());
            }

            for task in tasks {
                let id = task.id();
                let kind = task.kind();
                let cancel = CancellationToken::new();
                let (status_tx, _) = watch::channel(TaskStatus::Pending);
                table.insert(
                    id,
                    TaskEntry {
                        task,
                        cancel: cancel.clone(),
                        status_tx,
                    },
                );
                started.push((id, kind, cancel));
            }
        }

        for (id, kind, cancel) in started {
            tracing::info!(task_id = %id, kind = %kind, "Task submitted");
            tokio::spawn(Arc::clone(&self.inner).drive(id, cancel));
        }
        Ok(ids)
    }

    /// Snapshot of a task.
    pub async fn get_status(&self, id: TaskId) -> Result<Task, CoordinatorError> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(&id)
            .map(|entry| entry.task.clone())
            .ok_or(CoordinatorError::NotFound(id))
    }

    /// Wait until a task reaches a terminal state and return its snapshot.
    pub async fn wait_for(&self, id: TaskId) -> Result<Task, CoordinatorError> {
        let mut status_rx = {
            let tasks = self.inner.tasks.read().await;
            let entry = tasks.get(&id).ok_or(CoordinatorError::NotFound(id))?;
            entry.status_tx.subscribe()
        };

        loop {
            if status_rx.borrow_and_update().is_terminal() {
                break;
            }
            if status_rx.changed().await.is_err() {
                break;
            }
        }

        self.get_status(id).await
    }

    /// Submit every task, wait for all of them, and return snapshots in input order.
    pub async fn execute_batch(&self, tasks: Vec<Task>) -> Result<Vec<Task>, CoordinatorError> {
        let max = self.inner.config.max_batch_size;
        if tasks.len() > max {
            return Err(CoordinatorError::BatchTooLarge {
                size: tasks.len(),
                max,
            });
        }

        tracing::info!(size = tasks.len(), "Executing batch");
        let ids = self.admit(tasks).await?;

        futures::future::join_all(ids.into_iter().map(|id| self.wait_for(id)))
            .await
            .into_iter()
            .collect()
    }

    /// Cancel a pending or running task.
    ///
    /// The task is marked `failed (cancelled)` immediately. Terminal tasks are
    /// returned unchanged.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, CoordinatorError> {
        let mut tasks = self.inner.tasks.write().await;
        let entry = tasks.get_mut(&id).ok_or(CoordinatorError::NotFound(id))?;

        if !entry.task.status().is_terminal() {
            entry.task.advance(TaskEvent::Fail(TaskFailure::cancelled()))?;
            entry.status_tx.send_replace(entry.task.status());
            entry.cancel.cancel();
            tracing::info!(task_id = %id, "Task cancelled");
        }

        Ok(entry.task.clone())
    }

    /// Snapshots of all tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.inner.tasks.read().await;
        let mut snapshots: Vec<Task> = tasks.values().map(|entry| entry.task.clone()).collect();
        snapshots.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        snapshots
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.inner.tasks.read().await;
        let mut stats = TaskStats {
            total: tasks.len(),
            ..TaskStats::default()
        };
        for entry in tasks.values() {
            match entry.task.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

impl Inner {
    /// Background lifecycle of one task.
    async fn drive(self: Arc<Self>, id: TaskId, cancel: CancellationToken) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => {
                    self.apply(id, TaskEvent::Fail(TaskFailure::rejected("worker pool closed")))
                        .await;
                    return;
                }
            },
        };

        let Some(pending) = self.start(id).await else {
            return;
        };

        let decision = self.policy.decide(&pending);
        tracing::info!(
            task_id = %id,
            kind = %pending.kind(),
            target = %decision.target,
            reason = %decision.reason,
            "Task routed"
        );
        let Some(task) = self
            .update(id, |task| task.set_target(decision.target))
            .await
        else {
            return;
        };

        let executor = match decision.target {
            RouteTarget::Local => Arc::clone(&self.local),
            RouteTarget::Remote => Arc::clone(&self.remote),
        };

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %id, "Abandoning backend call for cancelled task");
                return;
            }
            event = self.dispatch(&task, executor.as_ref()) => event,
        };

        self.apply(id, event).await;
        drop(permit);
    }

    /// Move a pending task to running and return the running snapshot.
    async fn start(&self, id: TaskId) -> Option<Task> {
        self.apply(id, TaskEvent::Start).await?;
        self.get(id).await
    }

    /// Call the executor with timeout and retry handling.
    async fn dispatch(&self, task: &Task, executor: &dyn Executor) -> TaskEvent {
        let id = task.id();
        let timeout = self.config.request_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.update(id, Task::record_attempt).await;

            let call = AssertUnwindSafe(executor.execute(task)).catch_unwind();
            let error = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(Ok(result))) => return TaskEvent::Succeed(result),
                Ok(Ok(Err(error))) => error,
                Ok(Err(_panic)) => {
                    tracing::warn!(task_id = %id, executor = executor.name(), "Executor panicked");
                    return TaskEvent::Fail(TaskFailure::rejected(format!(
                        "{} executor failed unexpectedly",
                        executor.name()
                    )));
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        task_id = %id,
                        executor = executor.name(),
                        timeout_secs = timeout.as_secs_f64(),
                        "Executor call timed out"
                    );
                    return TaskEvent::Fail(TaskFailure::timeout(timeout));
                }
            };

            if !error.is_transient() {
                tracing::warn!(task_id = %id, executor = executor.name(), error = %error, "Executor rejected task");
                return TaskEvent::Fail(TaskFailure::rejected(error));
            }
            if attempt > self.config.max_retries {
                return TaskEvent::Fail(TaskFailure::exhausted(attempt, error));
            }

            let delay = self.config.retry_backoff * attempt;
            tracing::warn!(
                task_id = %id,
                executor = executor.name(),
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient executor error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn get(&self, id: TaskId) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).map(|entry| entry.task.clone())
    }

    /// Mutate a task's bookkeeping fields and return the new snapshot.
    async fn update<F>(&self, id: TaskId, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id)?;
        f(&mut entry.task);
        Some(entry.task.clone())
    }

    /// Apply a lifecycle event. Returns `Some(())` only if the task moved.
    async fn apply(&self, id: TaskId, event: TaskEvent) -> Option<()> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id)?;

        let from = entry.task.status();
        if from.is_terminal() {
            tracing::debug!(task_id = %id, status = %from, "Dropping event for finished task");
            return None;
        }

        match entry.task.advance(event) {
            Ok(Transition::Applied) => {
                let task = &entry.task;
                entry.status_tx.send_replace(task.status());
                match (task.status(), task.error()) {
                    (TaskStatus::Running, _) => {
                        tracing::info!(task_id = %id, "Task started")
                    }
                    (TaskStatus::Completed, _) => tracing::info!(
                        task_id = %id,
                        attempts = task.attempts(),
                        "Task completed"
                    ),
                    (_, Some(failure)) => tracing::warn!(
                        task_id = %id,
                        reason = %failure.reason,
                        attempts = task.attempts(),
                        "Task failed: {}",
                        failure.message
                    ),
                    _ => {}
                }
                Some(())
            }
            Ok(Transition::Ignored) => {
                tracing::debug!(task_id = %id, status = %from, "Ignoring duplicate event");
                None
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Rejected lifecycle event");
                None
            }
        }
    }
}
