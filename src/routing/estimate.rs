//! Task estimation used by the routing policy.
//!
//! Estimates are pure: the same task always yields the same numbers. The
//! policy only depends on the [`Estimator`] trait, so the heuristic below can
//! be swapped for a calibrated model without touching routing.

use crate::task::{ComplexityHint, Task, TaskKind};

/// Deterministic estimates for a task.
///
/// # Contract
/// - `complexity()` returns a value in `1..=10`
/// - `local_confidence()` returns a value in `[0.0, 1.0]`
/// - All methods are total and side-effect free
pub trait Estimator: Send + Sync {
    /// How hard the task is, 1 (trivial) to 10 (very complex).
    fn complexity(&self, task: &Task) -> u8;

    /// Expected quality of a local result, 0.0 to 1.0.
    fn local_confidence(&self, task: &Task) -> f64;

    /// Expected wall time for local execution in milliseconds.
    fn local_latency_ms(&self, task: &Task) -> u64;
}

/// Languages the local executor has templates for.
pub const LOCAL_TEMPLATE_LANGUAGES: &[&str] =
    &["python", "javascript", "typescript", "java", "csharp"];

/// Default estimator built from payload size, kind and caller hints.
///
/// # Complexity
/// 1. An explicit hint wins: `low` = 2, `medium` = 5, `high` = 8, or a numeric score
/// 2. Otherwise a per-kind base, overridden by keywords in a generation prompt
/// 3. +1 above 1000 chars of primary text, +2 above 4000
///
/// # Confidence
/// `0.95 - 0.05 * (complexity - 1)`, minus 0.25 without a local template for
/// the language and minus 0.2 for security analysis.
///
/// # Latency
/// Per-kind base times complexity, plus 1ms per 10 payload chars, halved with `use_gpu`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self
    }

    fn kind_base(kind: TaskKind) -> u8 {
        match kind {
            TaskKind::Generation => 3,
            TaskKind::Optimization => 4,
            TaskKind::Review => 3,
            TaskKind::SecurityAnalysis => 6,
        }
    }

    fn kind_latency_ms(kind: TaskKind) -> u64 {
        match kind {
            TaskKind::Generation => 400,
            TaskKind::Optimization => 600,
            TaskKind::Review => 500,
            TaskKind::SecurityAnalysis => 1500,
        }
    }

    /// Look for complexity keywords in free-form text.
    fn score_from_text(text: &str) -> Option<u8> {
        let text_lower = text.to_lowercase();

        if text_lower.contains("trivial") || text_lower.contains("simple") {
            return Some(2);
        }
        if text_lower.contains("very complex") {
            return Some(9);
        }
        if text_lower.contains("complex") {
            return Some(7);
        }
        None
    }
}

impl Estimator for HeuristicEstimator {
    fn complexity(&self, task: &Task) -> u8 {
        let payload = task.payload();
        let text = payload.primary_text(task.kind());

        let base = match payload.complexity_hint() {
            Some(ComplexityHint::Low) => 2,
            Some(ComplexityHint::Medium) => 5,
            Some(ComplexityHint::High) => 8,
            Some(ComplexityHint::Score(score)) => return score.clamp(1, 10),
            None if task.kind() == TaskKind::Generation => {
                Self::score_from_text(text).unwrap_or_else(|| Self::kind_base(task.kind()))
            }
            None => Self::kind_base(task.kind()),
        };

        let size_bonus = match text.len() {
            n if n > 4000 => 2,
            n if n > 1000 => 1,
            _ => 0,
        };

        base.saturating_add(size_bonus).clamp(1, 10)
    }

    fn local_confidence(&self, task: &Task) -> f64 {
        let complexity = self.complexity(task) as f64;
        let mut confidence = 0.95 - 0.05 * (complexity - 1.0);

        if !LOCAL_TEMPLATE_LANGUAGES.contains(&task.payload().language()) {
            confidence -= 0.25;
        }
        if task.kind() == TaskKind::SecurityAnalysis {
            confidence -= 0.2;
        }

        confidence.clamp(0.0, 1.0)
    }

    fn local_latency_ms(&self, task: &Task) -> u64 {
        let complexity = self.complexity(task) as u64;
        let size_ms = (task.payload().text_len() / 10) as u64;
        let latency = Self::kind_latency_ms(task.kind())
            .saturating_mul(complexity)
            .saturating_add(size_ms);

        if task.payload().use_gpu() {
            latency / 2
        } else {
            latency
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(kind: TaskKind, payload: serde_json::Value) -> Task {
        Task::new(kind, payload).unwrap()
    }

    #[test]
    fn test_hint_wins() {
        let estimator = HeuristicEstimator::new();
        let low = task(
            TaskKind::Generation,
            json!({"prompt": "a very complex distributed system", "complexity": "low"}),
        );
        assert_eq!(estimator.complexity(&low), 2);

        let scored = task(TaskKind::Generation, json!({"prompt": "x", "complexity": 8}));
        assert_eq!(estimator.complexity(&scored), 8);
    }

    #[test]
    fn test_keywords_and_size() {
        let estimator = HeuristicEstimator::new();
        let simple = task(TaskKind::Generation, json!({"prompt": "a simple adder"}));
        assert_eq!(estimator.complexity(&simple), 2);

        let complex = task(TaskKind::Generation, json!({"prompt": "a complex parser"}));
        assert_eq!(estimator.complexity(&complex), 7);

        let big = task(TaskKind::Optimization, json!({"code": "x = 1\n".repeat(1000)}));
        assert_eq!(estimator.complexity(&big), 4 + 2);
    }

    #[test]
    fn test_estimates_are_deterministic_and_bounded() {
        let estimator = HeuristicEstimator::new();
        let t = task(
            TaskKind::SecurityAnalysis,
            json!({"code": "eval(input())".repeat(500), "language": "rust"}),
        );

        let first = (
            estimator.complexity(&t),
            estimator.local_confidence(&t),
            estimator.local_latency_ms(&t),
        );
        for _ in 0..10 {
            assert_eq!(
                first,
                (
                    estimator.complexity(&t),
                    estimator.local_confidence(&t),
                    estimator.local_latency_ms(&t),
                )
            );
        }
        assert!((1..=10).contains(&first.0));
        assert!((0.0..=1.0).contains(&first.1));
    }

    #[test]
    fn test_confidence_drops_without_template() {
        let estimator = HeuristicEstimator::new();
        let python = task(TaskKind::Generation, json!({"prompt": "x", "language": "python"}));
        let cpp = task(TaskKind::Generation, json!({"prompt": "x", "language": "cpp"}));
        assert!(estimator.local_confidence(&cpp) < estimator.local_confidence(&python));
    }

    #[test]
    fn test_gpu_halves_latency() {
        let estimator = HeuristicEstimator::new();
        let cpu = task(TaskKind::Generation, json!({"prompt": "x"}));
        let gpu = task(TaskKind::Generation, json!({"prompt": "x", "use_gpu": true}));
        assert!(estimator.local_latency_ms(&gpu) < estimator.local_latency_ms(&cpu));
    }
}
