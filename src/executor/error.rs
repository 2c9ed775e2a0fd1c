//! Executor error types with retry classification.
//!
//! Distinguishes between transient errors (should retry) and permanent errors (should not retry).

/// Error returned by an executor backend.
#[derive(Debug, Clone)]
pub struct ExecutorError {
    /// The kind of error
    pub kind: ExecutorErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
}

impl ExecutorError {
    pub fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            status_code: Some(429),
            ..Self::new(ExecutorErrorKind::RateLimited, message)
        }
    }

    /// Create a server error.
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(ExecutorErrorKind::ServerError, message)
        }
    }

    /// Create a client error (bad request, invalid payload, etc.).
    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(ExecutorErrorKind::ClientError, message)
        }
    }

    /// Create a network error.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::NetworkError, message)
    }

    /// Create a parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::ParseError, message)
    }

    /// The backend cannot handle this kind of task at all.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Unsupported, message)
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Build an error from a non-success HTTP response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(classify_http_status(status_code), body)
        }
    }
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Classification of executor errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorKind {
    /// Rate limited (429) - transient, should retry
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient, should retry
    ServerError,
    /// Network error (connection failed, reset) - transient, should retry
    NetworkError,
    /// Client error (400, 401, 403, 404, 422) - permanent, should not retry
    ClientError,
    /// Response could not be understood - permanent
    ParseError,
    /// Backend does not offer the capability - permanent
    Unsupported,
}

impl ExecutorErrorKind {
    /// Check if this error kind is transient (retry with the same backend).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutorErrorKind::RateLimited
                | ExecutorErrorKind::ServerError
                | ExecutorErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorErrorKind::RateLimited => write!(f, "Rate limited"),
            ExecutorErrorKind::ServerError => write!(f, "Server error"),
            ExecutorErrorKind::NetworkError => write!(f, "Network error"),
            ExecutorErrorKind::ClientError => write!(f, "Client error"),
            ExecutorErrorKind::ParseError => write!(f, "Parse error"),
            ExecutorErrorKind::Unsupported => write!(f, "Unsupported"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> ExecutorErrorKind {
    match status {
        429 => ExecutorErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ExecutorErrorKind::ServerError,
        400..=499 => ExecutorErrorKind::ClientError,
        _ => ExecutorErrorKind::ServerError,
    }
}
