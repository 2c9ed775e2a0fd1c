//! HTTP API for the hybrid router.
//!
//! ## Endpoints
//!
//! - `GET /health`, `GET /api/health` - Health check
//! - `GET /api/stats` - Task counts per status
//! - `POST /api/task` - Submit a new task
//! - `GET /api/task/{id}` - Get task status and result
//! - `POST /api/task/{id}/cancel` - Cancel a pending or running task
//! - `GET /api/task/{id}/stream` - Stream task status via SSE
//! - `GET /api/tasks` - List all tasks
//! - `POST /api/generate` - Submit a code generation task
//! - `POST /api/optimize` - Submit a code optimization task
//! - `POST /api/batch` - Run several tasks and wait for all of them

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
