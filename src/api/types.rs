//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::routing::RouteTarget;
use crate::task::{Task, TaskError, TaskFailure, TaskId, TaskKind, TaskStatus, DEFAULT_LANGUAGE};

/// Request to create a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    /// Task kind, e.g. `generation` or `code_generation`
    pub task_type: String,
    /// Kind-specific payload
    #[serde(default)]
    pub task_data: Value,
}

impl CreateTaskRequest {
    pub fn into_task(self) -> Result<Task, TaskError> {
        Task::from_request(&self.task_type, self.task_data)
    }
}

/// Convenience request for code generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateCodeRequest {
    pub prompt: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// `low` / `medium` / `high` or a score from 1 to 10
    #[serde(default = "default_complexity")]
    pub complexity: Value,
    #[serde(default)]
    pub use_gpu: bool,
    pub framework: Option<String>,
}

impl GenerateCodeRequest {
    pub fn into_task(self) -> Result<Task, TaskError> {
        let mut payload = json!({
            "prompt": self.prompt,
            "language": self.language,
            "complexity": self.complexity,
            "use_gpu": self.use_gpu,
        });
        if let Some(framework) = self.framework {
            payload["framework"] = Value::String(framework);
        }
        Task::new(TaskKind::Generation, payload)
    }
}

/// Convenience request for code optimization.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeCodeRequest {
    pub code: String,
    #[serde(default = "default_optimization_target")]
    pub optimization_target: String,
    #[serde(default = "default_language")]
    pub language: String,
}

impl OptimizeCodeRequest {
    pub fn into_task(self) -> Result<Task, TaskError> {
        Task::new(
            TaskKind::Optimization,
            json!({
                "code": self.code,
                "optimization_target": self.optimization_target,
                "language": self.language,
            }),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub tasks: Vec<CreateTaskRequest>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_complexity() -> Value {
    Value::String("low".to_string())
}

fn default_optimization_target() -> String {
    "performance".to_string()
}

/// Task as seen by API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    pub task_type: TaskKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RouteTarget>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            status: task.status(),
            result: task.result().cloned(),
            error: task.error().cloned(),
            task_type: task.kind(),
            target: task.target(),
            attempts: task.attempts(),
            created_at: task.created_at(),
            started_at: task.started_at(),
            completed_at: task.completed_at(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Seconds since the server started
    pub uptime: f64,
}
