//! In-process executor.
//!
//! Generation uses per-language templates, the other kinds are line-based
//! static checks. Nothing here blocks for long, so execution runs inline on
//! the calling task.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{Executor, ExecutorError};
use crate::routing::LOCAL_TEMPLATE_LANGUAGES;
use crate::task::{OptimizationTarget, Task, TaskKind};

const LOCAL_MODEL: &str = "local-template-v1";
const TEMPLATE_CONFIDENCE: f64 = 0.85;
const FALLBACK_CONFIDENCE: f64 = 0.5;
const MAX_LINE_LENGTH: usize = 120;

/// Template-based executor that handles every task kind without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    fn generate(&self, task: &Task) -> Value {
        let payload = task.payload();
        let prompt = payload
            .primary_text(TaskKind::Generation)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let language = payload.language();
        let framework = payload.str_field("framework");

        let description = match framework {
            Some(framework) => format!("{} (framework: {})", prompt, framework),
            None => prompt.clone(),
        };
        let words = identifier_words(&prompt);

        let code = match language {
            "python" => format!(
                "def {}(*args, **kwargs):\n    \"\"\"{}\"\"\"\n    raise NotImplementedError(\"{}\")\n",
                snake_case(&words),
                docstring_text(&description),
                snake_case(&words)
            ),
            "javascript" => format!(
                "/**\n * {}\n */\nfunction {}(...args) {{\n  throw new Error(\"not implemented\");\n}}\n\nmodule.exports = {{ {} }};\n",
                comment_text(&description),
                camel_case(&words),
                camel_case(&words)
            ),
            "typescript" => format!(
                "/**\n * {}\n */\nexport function {}(...args: unknown[]): unknown {{\n  throw new Error(\"not implemented\");\n}}\n",
                comment_text(&description),
                camel_case(&words)
            ),
            "java" => format!(
                "/**\n * {}\n */\npublic class {} {{\n    public static Object run(Object... args) {{\n        throw new UnsupportedOperationException(\"not implemented\");\n    }}\n}}\n",
                comment_text(&description),
                pascal_case(&words)
            ),
            "csharp" => format!(
                "/// <summary>\n/// {}\n/// </summary>\npublic static class {}\n{{\n    public static object Run(params object[] args)\n    {{\n        throw new System.NotImplementedException();\n    }}\n}}\n",
                xml_text(&description),
                pascal_case(&words)
            ),
            _ => format!(
                "// {}\n// No local template for {}.\n",
                comment_text(&description),
                language
            ),
        };

        let confidence = if LOCAL_TEMPLATE_LANGUAGES.contains(&language) {
            TEMPLATE_CONFIDENCE
        } else {
            FALLBACK_CONFIDENCE
        };

        json!({
            "code": code,
            "language": language,
            "confidence": confidence,
            "model": LOCAL_MODEL,
            "generated_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn optimize(&self, task: &Task) -> Value {
        let payload = task.payload();
        let original = payload.primary_text(TaskKind::Optimization);
        let language = payload.language();
        let target = payload
            .optimization_target()
            .unwrap_or(OptimizationTarget::Performance);

        let mut improvements = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut trimmed_any = false;
        let mut blank_run = 0;
        let mut collapsed_any = false;

        for line in original.lines() {
            let trimmed = line.trim_end();
            if trimmed.len() != line.len() {
                trimmed_any = true;
            }
            if trimmed.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    collapsed_any = true;
                    continue;
                }
            } else {
                blank_run = 0;
            }
            lines.push(trimmed.to_string());
        }

        if trimmed_any {
            improvements.push("Removed trailing whitespace".to_string());
        }
        if collapsed_any {
            improvements.push("Collapsed repeated blank lines".to_string());
        }

        for (pattern, advice) in optimization_hints(language, target) {
            if original.contains(pattern) {
                improvements.push(advice.to_string());
            }
        }

        let mut optimized = lines.join("\n");
        if original.ends_with('\n') {
            optimized.push('\n');
        }

        json!({
            "original_code": original,
            "optimized_code": optimized,
            "language": language,
            "optimization_target": target.as_str(),
            "improvements": improvements,
            "model": LOCAL_MODEL,
            "optimized_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn review(&self, task: &Task) -> Value {
        let code = task.payload().primary_text(TaskKind::Review);
        let mut findings = Vec::new();

        for (index, line) in code.lines().enumerate() {
            let line_no = index + 1;
            if line.chars().count() > MAX_LINE_LENGTH {
                findings.push(finding(line_no, "long-line", "Line exceeds 120 characters"));
            }
            if line.contains("TODO") || line.contains("FIXME") {
                findings.push(finding(line_no, "todo-marker", "Unresolved TODO/FIXME marker"));
            }
            if line.starts_with('\t') {
                findings.push(finding(line_no, "tab-indent", "Indentation uses tabs"));
            }
            if line.len() != line.trim_end().len() {
                findings.push(finding(line_no, "trailing-whitespace", "Trailing whitespace"));
            }
        }

        let summary = if findings.is_empty() {
            "No issues found".to_string()
        } else {
            format!("{} issue(s) found", findings.len())
        };

        json!({
            "findings": findings,
            "summary": summary,
            "model": LOCAL_MODEL,
        })
    }

    fn scan_security(&self, task: &Task) -> Value {
        let code = task.payload().primary_text(TaskKind::SecurityAnalysis);
        let mut findings = Vec::new();
        let mut high = false;

        for (index, line) in code.lines().enumerate() {
            for rule in security_rules() {
                if rule.pattern.is_match(line) {
                    high |= rule.severity == "high";
                    findings.push(json!({
                        "line": index + 1,
                        "rule": rule.id,
                        "severity": rule.severity,
                        "message": rule.message,
                    }));
                }
            }
        }

        let risk_level = if high {
            "high"
        } else if findings.is_empty() {
            "none"
        } else {
            "medium"
        };

        json!({
            "findings": findings,
            "risk_level": risk_level,
            "model": LOCAL_MODEL,
        })
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutorError> {
        let result = match task.kind() {
            TaskKind::Generation => self.generate(task),
            TaskKind::Optimization => self.optimize(task),
            TaskKind::Review => self.review(task),
            TaskKind::SecurityAnalysis => self.scan_security(task),
        };
        Ok(result)
    }
}

fn finding(line: usize, rule: &str, message: &str) -> Value {
    json!({"line": line, "rule": rule, "message": message})
}

fn optimization_hints(
    language: &str,
    target: OptimizationTarget,
) -> &'static [(&'static str, &'static str)] {
    match (language, target) {
        ("python", OptimizationTarget::Performance) => &[
            ("range(len(", "Iterate directly or use enumerate() instead of range(len(...))"),
            ("+= str(", "Build strings with ''.join() instead of repeated concatenation"),
        ],
        ("python", OptimizationTarget::Memory) => &[(
            "readlines()",
            "Iterate over the file object instead of loading all lines",
        )],
        ("javascript" | "typescript", OptimizationTarget::Performance) => &[(
            ".forEach(",
            "Prefer a for...of loop in hot paths",
        )],
        ("java", OptimizationTarget::Performance) => &[(
            "String +=",
            "Use StringBuilder for repeated concatenation",
        )],
        _ => &[],
    }
}

struct SecurityRule {
    id: &'static str,
    severity: &'static str,
    message: &'static str,
    pattern: Regex,
}

fn security_rules() -> &'static [SecurityRule] {
    static RULES: OnceLock<Vec<SecurityRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            ("dynamic-eval", "high", "Dynamic code evaluation", r"\b(eval|exec)\s*\("),
            (
                "hardcoded-secret",
                "high",
                "Hardcoded credential",
                r#"(?i)\b(password|passwd|secret|api_key|apikey|token)\s*[:=]\s*["'][^"']+["']"#,
            ),
            (
                "shell-injection",
                "high",
                "Shell command built from program input",
                r"(os\.system\s*\(|shell\s*=\s*True|Runtime\.getRuntime\(\)\.exec)",
            ),
            (
                "sql-concatenation",
                "medium",
                "SQL built by string concatenation",
                r#"(?i)(select|insert|update|delete)\b.*["']\s*(\+|%)"#,
            ),
            (
                "weak-hash",
                "medium",
                "Weak hash algorithm",
                r"(?i)\b(md5|sha1)\s*\(",
            ),
        ]
        .into_iter()
        .filter_map(|(id, severity, message, pattern)| {
            Regex::new(pattern).ok().map(|pattern| SecurityRule {
                id,
                severity,
                message,
                pattern,
            })
        })
        .collect()
    })
}

/// Text safe inside a Python triple-quoted docstring.
fn docstring_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Text safe inside a `/** */` block comment.
fn comment_text(text: &str) -> String {
    text.replace("*/", "* /")
}

/// Text safe inside an XML doc comment.
fn xml_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn identifier_words(prompt: &str) -> Vec<String> {
    let words: Vec<String> = prompt
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .map(|w| w.to_ascii_lowercase())
        .collect();

    match words.first() {
        None => vec!["generated".to_string()],
        Some(first) if first.starts_with(|c: char| c.is_ascii_digit()) => {
            std::iter::once("fn".to_string()).chain(words).collect()
        }
        Some(_) => words,
    }
}

fn snake_case(words: &[String]) -> String {
    words.join("_")
}

fn pascal_case(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn camel_case(words: &[String]) -> String {
    let pascal = pascal_case(words);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => pascal,
    }
}
