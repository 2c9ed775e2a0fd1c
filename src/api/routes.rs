//! HTTP route handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorError, TaskStats};
use crate::task::{Task, TaskError, TaskId};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub coordinator: Coordinator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, coordinator: Coordinator) -> Self {
        Self {
            config,
            coordinator,
            started_at: Instant::now(),
        }
    }
}

type ApiError = (StatusCode, String);

fn error_response(error: CoordinatorError) -> ApiError {
    let status = match &error {
        CoordinatorError::Task(TaskError::Validation(_)) => StatusCode::BAD_REQUEST,
        CoordinatorError::Task(TaskError::InvalidTransition { .. }) => {
            tracing::error!(error = %error, "Lifecycle invariant violated");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    };
    (status, error.to_string())
}

fn validation_error(error: TaskError) -> ApiError {
    error_response(CoordinatorError::Task(error))
}

/// Parse a path id. Anything that is not a UUID is an unknown task.
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse::<TaskId>()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("Task not found: {}", raw)))
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/task", post(create_task))
        .route("/api/task/:id", get(get_task))
        .route("/api/task/:id/cancel", post(cancel_task))
        .route("/api/task/:id/stream", get(stream_task))
        .route("/api/tasks", get(list_tasks))
        .route("/api/generate", post(generate_code))
        .route("/api/optimize", post(optimize_code))
        .route("/api/batch", post(execute_batch))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let coordinator = Coordinator::from_config(&config)?;
    tracing::info!(
        strategy = ?config.routing.strategy,
        worker_threads = config.execution.worker_threads,
        "Coordinator ready"
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, coordinator));
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let stats = state.coordinator.stats().await;
    let active = stats.pending + stats.running;
    if active > 0 {
        tracing::warn!(
            pending = stats.pending,
            running = stats.running,
            "Shutdown signal received with {} unfinished tasks",
            active
        );
    } else {
        tracing::info!("Shutdown signal received");
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Per-status task counts.
async fn get_stats(State(state): State<Arc<AppState>>) -> Json<TaskStats> {
    Json(state.coordinator.stats().await)
}

/// List all tasks, newest first.
async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskResponse>> {
    let tasks = state.coordinator.list().await;
    Json(tasks.iter().map(TaskResponse::from).collect())
}

/// Submit a task and answer with its pending snapshot.
async fn submit(state: &AppState, task: Task) -> Result<Json<TaskResponse>, ApiError> {
    let response = TaskResponse::from(&task);
    state
        .coordinator
        .submit(task)
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

/// Create a new task.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = req.into_task().map_err(validation_error)?;
    submit(&state, task).await
}

/// Create a generation task.
async fn generate_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateCodeRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = req.into_task().map_err(validation_error)?;
    submit(&state, task).await
}

/// Create an optimization task.
async fn optimize_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeCodeRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = req.into_task().map_err(validation_error)?;
    submit(&state, task).await
}

/// Run several tasks and return their final states in request order.
async fn execute_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let max = state.config.execution.max_batch_size;
    if req.tasks.len() > max {
        return Err(error_response(CoordinatorError::BatchTooLarge {
            size: req.tasks.len(),
            max,
        }));
    }

    let tasks = req
        .tasks
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.into_task().map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("tasks[{}]: {}", index, e),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let finished = state
        .coordinator
        .execute_batch(tasks)
        .await
        .map_err(error_response)?;
    Ok(Json(finished.iter().map(TaskResponse::from).collect()))
}

/// Get task status and result.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(&id)?;
    state
        .coordinator
        .get_status(id)
        .await
        .map(|task| Json(TaskResponse::from(&task)))
        .map_err(error_response)
}

/// Cancel a pending or running task.
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(&id)?;
    state
        .coordinator
        .cancel(id)
        .await
        .map(|task| Json(TaskResponse::from(&task)))
        .map_err(error_response)
}

/// Stream task status changes via SSE.
async fn stream_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let id = parse_task_id(&id)?;
    state
        .coordinator
        .get_status(id)
        .await
        .map_err(error_response)?;

    let stream = async_stream::stream! {
        let mut last_status = None;

        loop {
            let task = match state.coordinator.get_status(id).await {
                Ok(task) => task,
                Err(_) => break,
            };

            if last_status != Some(task.status()) {
                last_status = Some(task.status());
                let name = if task.status().is_terminal() { "done" } else { "status" };
                match Event::default().event(name).json_data(TaskResponse::from(&task)) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        tracing::warn!(task_id = %id, "Failed to encode SSE event: {}", e);
                        break;
                    }
                }
            }

            if task.status().is_terminal() {
                break;
            }

            // Poll interval
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    };

    Ok(Sse::new(stream))
}
