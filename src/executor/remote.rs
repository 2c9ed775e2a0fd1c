//! HTTP client for the remote AI service.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use url::Url;

use super::cache::ResponseCache;
use super::{Executor, ExecutorError, ExecutorErrorKind};
use crate::task::{Task, TaskKind};

/// Executor that forwards tasks to `{endpoint}/v1/code/{operation}`.
///
/// Each call is a single request. The coordinator owns timeouts and retries;
/// this type only classifies what went wrong. With a cache attached, successful
/// responses are reused for identical requests.
pub struct RemoteExecutor {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    cache: Option<ResponseCache>,
}

impl RemoteExecutor {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            cache: None,
        }
    }

    pub fn with_cache(mut self, ttl: Duration, max_entries: usize) -> Self {
        self.cache = Some(ResponseCache::new(ttl, max_entries));
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn operation_url(&self, kind: TaskKind) -> String {
        let operation = match kind {
            TaskKind::Generation => "generate",
            TaskKind::Optimization => "optimize",
            TaskKind::Review => "review",
            TaskKind::SecurityAnalysis => "security",
        };
        format!(
            "{}/v1/code/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            operation
        )
    }

    /// Task ids are left out so that equal requests share an entry.
    fn cache_key(url: &str, task: &Task) -> String {
        format!("{}:{}", url, Value::Object(task.payload().as_map().clone()))
    }

    fn request_body(task: &Task) -> Value {
        let mut body: Map<String, Value> = task.payload().as_map().clone();
        body.insert("task_id".to_string(), Value::String(task.id().to_string()));
        body.insert(
            "task_type".to_string(),
            Value::String(task.kind().as_str().to_string()),
        );
        Value::Object(body)
    }

    /// Validate a successful response body and fill in `code` from chat-style replies.
    fn interpret(kind: TaskKind, body: &str) -> Result<Value, ExecutorError> {
        let mut value: Value = serde_json::from_str(body).map_err(|e| {
            ExecutorError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
        })?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| ExecutorError::parse_error("Response is not a JSON object"))?;

        if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ExecutorError::new(ExecutorErrorKind::ClientError, message));
        }
        if object.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ExecutorError::new(
                ExecutorErrorKind::ClientError,
                "Remote service reported failure",
            ));
        }

        if kind == TaskKind::Generation && !object.contains_key("code") {
            let code = object
                .get("content")
                .and_then(Value::as_str)
                .map(extract_code_block)
                .ok_or_else(|| ExecutorError::parse_error("Response has neither code nor content"))?;
            object.insert("code".to_string(), Value::String(code));
        }

        Ok(value)
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn name(&self) -> &str {
        "remote"
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutorError> {
        let url = self.operation_url(task.kind());
        let cache_key = self.cache.as_ref().map(|_| Self::cache_key(&url, task));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(value) = cache.get(key).await {
                tracing::debug!(task_id = %task.id(), "Using cached remote response");
                return Ok(value);
            }
        }

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&Self::request_body(task));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(ExecutorError::network_error(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(ExecutorError::network_error(format!("Connection failed: {}", e)));
                } else {
                    return Err(ExecutorError::network_error(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::debug!(task_id = %task.id(), status = status.as_u16(), "Remote call failed");
            return Err(ExecutorError::from_status(status.as_u16(), body));
        }

        let value = Self::interpret(task.kind(), &body)?;
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, value.clone()).await;
        }
        Ok(value)
    }
}

/// First fenced code block in `content`, or the whole text if there is none.
fn extract_code_block(content: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+#-]*\n(.*?)```").ok());

    fence
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn generate(
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match body["prompt"].as_str().unwrap_or_default() {
            "overload" => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))),
            "bad" => (StatusCode::BAD_REQUEST, Json(json!({"detail": "bad"}))),
            "chat" => (
                StatusCode::OK,
                Json(json!({"content": "Here:\n```python\nprint('hi')\n```\nDone."})),
            ),
            "refuse" => (StatusCode::OK, Json(json!({"error": "content policy"}))),
            _ => (
                StatusCode::OK,
                Json(json!({
                    "code": "def f(): pass",
                    "auth": auth,
                    "task_type": body["task_type"],
                })),
            ),
        }
    }

    async fn spawn_service() -> Url {
        let app = Router::new().route("/v1/code/generate", post(generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn generation(prompt: &str) -> Task {
        Task::new(TaskKind::Generation, json!({"prompt": prompt})).unwrap()
    }

    #[tokio::test]
    async fn test_success_forwards_payload_and_key() {
        let executor = RemoteExecutor::new(spawn_service().await, Some("secret".to_string()));
        let result = executor.execute(&generation("sort list")).await.unwrap();
        assert_eq!(result["code"], "def f(): pass");
        assert_eq!(result["auth"], "Bearer secret");
        assert_eq!(result["task_type"], "generation");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let executor = RemoteExecutor::new(spawn_service().await, None);

        let err = executor.execute(&generation("overload")).await.unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::ServerError);
        assert!(err.is_transient());

        let err = executor.execute(&generation("bad")).await.unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::ClientError);
        assert!(!err.is_transient());

        let err = executor.execute(&generation("refuse")).await.unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::ClientError);
        assert_eq!(err.message, "content policy");
    }

    #[tokio::test]
    async fn test_chat_content_is_unfenced() {
        let executor = RemoteExecutor::new(spawn_service().await, None);
        let result = executor.execute(&generation("chat")).await.unwrap();
        assert_eq!(result["code"], "print('hi')\n");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor =
            RemoteExecutor::new(Url::parse(&format!("http://{}", addr)).unwrap(), None);
        let err = executor.execute(&generation("x")).await.unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::NetworkError);
    }

    async fn spawn_counting_service() -> (Url, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/code/generate",
                post(
                    |State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap, body: Json<Value>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        generate(headers, body).await
                    },
                ),
            )
            .with_state(Arc::clone(&hits));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{}/", addr)).unwrap(), hits)
    }

    #[tokio::test]
    async fn test_cache_reuses_successful_responses() {
        let (url, hits) = spawn_counting_service().await;
        let executor = RemoteExecutor::new(url, None).with_cache(Duration::from_secs(60), 10);

        let first = executor.execute(&generation("sort list")).await.unwrap();
        let second = executor.execute(&generation("sort list")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        executor.execute(&generation("parse json")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_skips_failures_and_expires() {
        let (url, hits) = spawn_counting_service().await;
        let executor =
            RemoteExecutor::new(url, None).with_cache(Duration::from_millis(50), 10);

        executor.execute(&generation("refuse")).await.unwrap_err();
        executor.execute(&generation("overload")).await.unwrap_err();
        executor.execute(&generation("refuse")).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        executor.execute(&generation("sort list")).await.unwrap();
        executor.execute(&generation("sort list")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.execute(&generation("sort list")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_without_cache_every_call_is_sent() {
        let (url, hits) = spawn_counting_service().await;
        let executor = RemoteExecutor::new(url, None);
        executor.execute(&generation("sort list")).await.unwrap();
        executor.execute(&generation("sort list")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_extract_without_fence() {
        assert_eq!(extract_code_block("  x = 1  "), "x = 1");
    }
}
