//! Routing policy: local execution or the remote AI service.
//!
//! # Strategies
//! - **local_first**: local unless the task kind needs the remote service
//! - **cloud_first**: remote unless the task is below the trivial-complexity floor
//! - **auto_select**: threshold checks in a fixed order (see [`RoutingPolicy::decide`])
//!
//! Configuration is validated when the policy is built, so `decide` is total.

mod estimate;

pub use estimate::{Estimator, HeuristicEstimator, LOCAL_TEMPLATE_LANGUAGES};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ExecutionStrategy, RoutingConfig};
use crate::task::Task;

/// Where a task is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Local,
    Remote,
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Which rule produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteReason {
    /// Estimated complexity above the local threshold
    ComplexityThreshold,
    /// Expected local latency above the latency threshold
    LatencyPreference,
    /// Expected local confidence below the confidence threshold
    LowConfidenceFallback,
    /// Strategy overridden by what the task needs
    Forced,
    /// auto_select found no reason to leave the local executor
    WithinThresholds,
    /// The strategy's default target
    StrategyDefault,
}

impl std::fmt::Display for RouteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ComplexityThreshold => "complexity-threshold",
            Self::LatencyPreference => "latency-preference",
            Self::LowConfidenceFallback => "low-confidence-fallback",
            Self::Forced => "forced",
            Self::WithinThresholds => "within-thresholds",
            Self::StrategyDefault => "strategy-default",
        };
        f.write_str(s)
    }
}

/// Output of applying the policy to a task. Consumed immediately by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub reason: RouteReason,
}

impl RoutingDecision {
    fn local(reason: RouteReason) -> Self {
        Self {
            target: RouteTarget::Local,
            reason,
        }
    }

    fn remote(reason: RouteReason) -> Self {
        Self {
            target: RouteTarget::Remote,
            reason,
        }
    }
}

/// Maps a task plus validated configuration to a routing decision.
#[derive(Clone)]
pub struct RoutingPolicy {
    config: RoutingConfig,
    estimator: Arc<dyn Estimator>,
}

impl std::fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RoutingPolicy {
    /// Build a policy with the default [`HeuristicEstimator`].
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if any threshold is out of range.
    pub fn new(config: RoutingConfig) -> Result<Self, ConfigError> {
        Self::with_estimator(config, Arc::new(HeuristicEstimator::new()))
    }

    /// Build a policy with a custom estimator.
    pub fn with_estimator(
        config: RoutingConfig,
        estimator: Arc<dyn Estimator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, estimator })
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Decide where a task runs.
    ///
    /// # auto_select order
    /// 1. complexity > threshold: remote (complexity-threshold)
    /// 2. local confidence < threshold: remote (low-confidence-fallback)
    /// 3. local latency > threshold: remote (latency-preference)
    /// 4. kind needs the remote service: remote (forced)
    /// 5. otherwise local (within-thresholds)
    pub fn decide(&self, task: &Task) -> RoutingDecision {
        let requires_remote = task.kind().requires_remote();

        match self.config.strategy {
            ExecutionStrategy::LocalFirst => {
                if requires_remote {
                    RoutingDecision::remote(RouteReason::Forced)
                } else {
                    RoutingDecision::local(RouteReason::StrategyDefault)
                }
            }
            ExecutionStrategy::CloudFirst => {
                let complexity = self.estimator.complexity(task);
                if complexity < self.config.trivial_complexity_floor && !requires_remote {
                    RoutingDecision::local(RouteReason::Forced)
                } else {
                    RoutingDecision::remote(RouteReason::StrategyDefault)
                }
            }
            ExecutionStrategy::AutoSelect => self.auto_select(task, requires_remote),
        }
    }

    fn auto_select(&self, task: &Task, requires_remote: bool) -> RoutingDecision {
        let complexity = self.estimator.complexity(task);
        if complexity > self.config.local_complexity_threshold {
            return RoutingDecision::remote(RouteReason::ComplexityThreshold);
        }

        let confidence = self.estimator.local_confidence(task);
        if confidence < self.config.local_confidence_threshold {
            return RoutingDecision::remote(RouteReason::LowConfidenceFallback);
        }

        let latency_ms = self.estimator.local_latency_ms(task);
        if latency_ms > self.config.latency_threshold_ms {
            return RoutingDecision::remote(RouteReason::LatencyPreference);
        }

        if requires_remote {
            return RoutingDecision::remote(RouteReason::Forced);
        }

        RoutingDecision::local(RouteReason::WithinThresholds)
    }
}
