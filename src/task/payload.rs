//! Task kinds and their kind-specific payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TaskError;

/// Languages the service accepts for any task.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "python",
    "typescript",
    "javascript",
    "java",
    "csharp",
    "cpp",
    "rust",
];

/// Language assumed when a payload does not name one.
pub const DEFAULT_LANGUAGE: &str = "python";

/// Kind of work a task asks for.
///
/// The wire names used by older clients (`code_generation`, ...) are accepted
/// by [`TaskKind::parse`] but never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Generation,
    Optimization,
    Review,
    SecurityAnalysis,
}

impl TaskKind {
    /// Parse a kind name, rejecting anything outside the known set.
    pub fn parse(value: &str) -> Result<Self, TaskError> {
        match value.trim().to_lowercase().as_str() {
            "generation" | "code_generation" | "code-generation" => Ok(Self::Generation),
            "optimization" | "code_optimization" | "code-optimization" => Ok(Self::Optimization),
            "review" | "code_review" | "code-review" => Ok(Self::Review),
            "security-analysis" | "security_analysis" => Ok(Self::SecurityAnalysis),
            other => Err(TaskError::Validation(format!(
                "Unknown task kind '{}'. Expected one of: generation, optimization, review, security-analysis",
                other
            ))),
        }
    }

    /// Whether only the remote service offers this capability in full.
    pub fn requires_remote(&self) -> bool {
        matches!(self, Self::SecurityAnalysis)
    }

    /// Payload field carrying the main input text for this kind.
    pub fn primary_field(&self) -> &'static str {
        match self {
            Self::Generation => "prompt",
            Self::Optimization | Self::Review | Self::SecurityAnalysis => "code",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Optimization => "optimization",
            Self::Review => "review",
            Self::SecurityAnalysis => "security-analysis",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization goal for optimization tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTarget {
    Performance,
    Memory,
    Readability,
}

impl OptimizationTarget {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "performance" => Some(Self::Performance),
            "memory" => Some(Self::Memory),
            "readability" => Some(Self::Readability),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Memory => "memory",
            Self::Readability => "readability",
        }
    }
}

/// Caller-supplied complexity hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityHint {
    Low,
    Medium,
    High,
    /// Explicit score in 1..=10
    Score(u8),
}

/// Structured input for a task.
///
/// # Invariants
/// - Always a JSON object
/// - The kind's primary field is a non-empty string
/// - `language`, if present, is a lowercase member of [`SUPPORTED_LANGUAGES`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskPayload(Map<String, Value>);

impl TaskPayload {
    /// Validate and normalize a raw payload for the given kind.
    pub fn validate(kind: TaskKind, raw: Value) -> Result<Self, TaskError> {
        let mut fields = match raw {
            Value::Object(map) => map,
            other => {
                return Err(TaskError::Validation(format!(
                    "Task payload must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let primary = kind.primary_field();
        match fields.get(primary) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => {
                return Err(TaskError::Validation(format!(
                    "'{}' must not be empty for {} tasks",
                    primary, kind
                )))
            }
            Some(_) => {
                return Err(TaskError::Validation(format!(
                    "'{}' must be a string",
                    primary
                )))
            }
            None => {
                return Err(TaskError::Validation(format!(
                    "'{}' is required for {} tasks",
                    primary, kind
                )))
            }
        }

        if let Some(value) = fields.get("language") {
            let language = value
                .as_str()
                .ok_or_else(|| TaskError::Validation("'language' must be a string".to_string()))?
                .trim()
                .to_lowercase();
            if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                return Err(TaskError::Validation(format!(
                    "Unsupported language: {}. Supported languages: {}",
                    language,
                    SUPPORTED_LANGUAGES.join(", ")
                )));
            }
            fields.insert("language".to_string(), Value::String(language));
        }

        if let Some(value) = fields.get("complexity") {
            if parse_complexity(value).is_none() {
                return Err(TaskError::Validation(
                    "'complexity' must be low, medium, high or an integer from 1 to 10"
                        .to_string(),
                ));
            }
        }

        if kind == TaskKind::Optimization {
            // `target` is the older field name
            let target = fields
                .remove("optimization_target")
                .or_else(|| fields.remove("target"));
            let target = match target {
                None => OptimizationTarget::Performance,
                Some(Value::String(s)) => OptimizationTarget::parse(&s).ok_or_else(|| {
                    TaskError::Validation(format!(
                        "Invalid optimization target '{}'. Expected performance, memory or readability",
                        s
                    ))
                })?,
                Some(_) => {
                    return Err(TaskError::Validation(
                        "'optimization_target' must be a string".to_string(),
                    ))
                }
            };
            fields.insert(
                "optimization_target".to_string(),
                Value::String(target.as_str().to_string()),
            );
        }

        if let Some(value) = fields.get("use_gpu") {
            if !value.is_boolean() {
                return Err(TaskError::Validation("'use_gpu' must be a boolean".to_string()));
            }
        }

        Ok(Self(fields))
    }

    /// A string field, if present.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Main input text for the given kind (prompt or code).
    pub fn primary_text(&self, kind: TaskKind) -> &str {
        self.str_field(kind.primary_field()).unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.str_field("language").unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn complexity_hint(&self) -> Option<ComplexityHint> {
        self.0.get("complexity").and_then(parse_complexity)
    }

    pub fn use_gpu(&self) -> bool {
        self.0
            .get("use_gpu")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn optimization_target(&self) -> Option<OptimizationTarget> {
        self.str_field("optimization_target")
            .and_then(OptimizationTarget::parse)
    }

    /// Total length of all string fields, used as a size signal.
    pub fn text_len(&self) -> usize {
        self.0
            .values()
            .filter_map(Value::as_str)
            .map(str::len)
            .sum()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn parse_complexity(value: &Value) -> Option<ComplexityHint> {
    match value {
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "low" => Some(ComplexityHint::Low),
            "medium" => Some(ComplexityHint::Medium),
            "high" => Some(ComplexityHint::High),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|n| (1..=10).contains(n))
                .map(ComplexityHint::Score),
        },
        Value::Number(n) => n
            .as_u64()
            .filter(|n| (1..=10).contains(n))
            .map(|n| ComplexityHint::Score(n as u8)),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
