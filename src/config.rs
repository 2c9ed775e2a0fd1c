//! Configuration management for the hybrid router.
//!
//! Configuration is read once at start-up into an immutable [`Config`] and
//! passed by reference from there on. Recognized environment variables:
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `EXECUTION_STRATEGY` - Optional. `local_first`, `cloud_first` or `auto_select` (default).
//! - `LOCAL_COMPLEXITY_THRESHOLD` - Optional. 1-10, defaults to `5`.
//! - `LATENCY_THRESHOLD` - Optional. Milliseconds, defaults to `2000`.
//! - `LOCAL_CONFIDENCE_THRESHOLD` - Optional. 0.0-1.0, defaults to `0.7`.
//! - `TRIVIAL_COMPLEXITY_FLOOR` - Optional. 1-10, defaults to `2`.
//! - `MAX_BATCH_SIZE` - Optional. Defaults to `32`.
//! - `WORKER_THREADS` - Optional. Concurrent executions, defaults to `4`.
//! - `REQUEST_TIMEOUT` - Optional. Seconds per executor call, defaults to `30`.
//! - `MAX_RETRIES` - Optional. Retries for transient backend errors, defaults to `2`.
//! - `RETRY_BACKOFF_MS` - Optional. Base delay between retries, defaults to `250`.
//! - `REMOTE_ENDPOINT` - Optional. Base URL of the remote AI service
//!   (`AZURE_FOUNDRY_ENDPOINT` is accepted as a fallback name).
//! - `REMOTE_API_KEY` - Optional. Bearer token for the remote service.
//! - `ENABLE_CACHE` - Optional. Reuse successful remote responses, defaults to `true`.
//! - `CACHE_TTL` - Optional. Seconds a cached response stays valid, defaults to `3600`.
//! - `MAX_CACHE_SIZE` - Optional. Cached responses kept at most, defaults to `1000`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), message.into())
}

/// How the routing policy chooses between local and remote execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    LocalFirst,
    CloudFirst,
    AutoSelect,
}

impl FromStr for ExecutionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local_first" => Ok(Self::LocalFirst),
            "cloud_first" => Ok(Self::CloudFirst),
            "auto_select" => Ok(Self::AutoSelect),
            other => Err(invalid(
                "EXECUTION_STRATEGY",
                format!(
                    "'{}' (expected local_first, cloud_first or auto_select)",
                    other
                ),
            )),
        }
    }
}

/// Thresholds consumed by the routing policy.
///
/// # Invariants (checked by [`RoutingConfig::validate`])
/// - `1 <= local_complexity_threshold <= 10`
/// - `1 <= trivial_complexity_floor <= 10`
/// - `0.0 <= local_confidence_threshold <= 1.0`
/// - `latency_threshold_ms > 0`
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    pub strategy: ExecutionStrategy,
    pub local_complexity_threshold: u8,
    pub latency_threshold_ms: u64,
    pub local_confidence_threshold: f64,
    /// Under `cloud_first`, tasks below this complexity stay local
    pub trivial_complexity_floor: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::AutoSelect,
            local_complexity_threshold: 5,
            latency_threshold_ms: 2000,
            local_confidence_threshold: 0.7,
            trivial_complexity_floor: 2,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.local_complexity_threshold) {
            return Err(invalid(
                "LOCAL_COMPLEXITY_THRESHOLD",
                format!("{} is outside 1-10", self.local_complexity_threshold),
            ));
        }
        if !(1..=10).contains(&self.trivial_complexity_floor) {
            return Err(invalid(
                "TRIVIAL_COMPLEXITY_FLOOR",
                format!("{} is outside 1-10", self.trivial_complexity_floor),
            ));
        }
        // Written this way so NaN is rejected too
        if !(self.local_confidence_threshold >= 0.0 && self.local_confidence_threshold <= 1.0) {
            return Err(invalid(
                "LOCAL_CONFIDENCE_THRESHOLD",
                format!("{} is outside 0.0-1.0", self.local_confidence_threshold),
            ));
        }
        if self.latency_threshold_ms == 0 {
            return Err(invalid("LATENCY_THRESHOLD", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Limits applied by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum executions in flight at once
    pub worker_threads: usize,
    /// Maximum tasks accepted by one batch call
    pub max_batch_size: usize,
    /// Bound on a single executor call
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient errors
    pub max_retries: u32,
    /// Delay before retry `n` is `retry_backoff * n`
    pub retry_backoff: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_batch_size: 32,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(invalid("WORKER_THREADS", "must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("MAX_BATCH_SIZE", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("REQUEST_TIMEOUT", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Remote AI service connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Base URL; `None` means no remote service is available
    pub endpoint: Option<Url>,
    pub api_key: Option<String>,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            max_cache_size: 1000,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_enabled && self.cache_ttl.is_zero() {
            return Err(invalid("CACHE_TTL", "must be greater than 0"));
        }
        if self.cache_enabled && self.max_cache_size == 0 {
            return Err(invalid("MAX_CACHE_SIZE", "must be at least 1"));
        }
        Ok(())
    }
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub routing: RoutingConfig,
    pub execution: ExecutionConfig,
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            routing: RoutingConfig::default(),
            execution: ExecutionConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable does not parse or is
    /// outside its declared range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("HOST").unwrap_or(defaults.host);
        let port = parse_or(&get, "PORT", defaults.port)?;

        let strategy = match get("EXECUTION_STRATEGY") {
            Some(value) => value.parse()?,
            None => defaults.routing.strategy,
        };
        let routing = RoutingConfig {
            strategy,
            local_complexity_threshold: parse_or(
                &get,
                "LOCAL_COMPLEXITY_THRESHOLD",
                defaults.routing.local_complexity_threshold,
            )?,
            latency_threshold_ms: parse_or(
                &get,
                "LATENCY_THRESHOLD",
                defaults.routing.latency_threshold_ms,
            )?,
            local_confidence_threshold: parse_or(
                &get,
                "LOCAL_CONFIDENCE_THRESHOLD",
                defaults.routing.local_confidence_threshold,
            )?,
            trivial_complexity_floor: parse_or(
                &get,
                "TRIVIAL_COMPLEXITY_FLOOR",
                defaults.routing.trivial_complexity_floor,
            )?,
        };
        routing.validate()?;

        let execution = ExecutionConfig {
            worker_threads: parse_or(&get, "WORKER_THREADS", defaults.execution.worker_threads)?,
            max_batch_size: parse_or(&get, "MAX_BATCH_SIZE", defaults.execution.max_batch_size)?,
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT",
                defaults.execution.request_timeout.as_secs(),
            )?),
            max_retries: parse_or(&get, "MAX_RETRIES", defaults.execution.max_retries)?,
            retry_backoff: Duration::from_millis(parse_or(
                &get,
                "RETRY_BACKOFF_MS",
                defaults.execution.retry_backoff.as_millis() as u64,
            )?),
        };
        execution.validate()?;

        let endpoint = match get("REMOTE_ENDPOINT").or_else(|| get("AZURE_FOUNDRY_ENDPOINT")) {
            Some(raw) => Some(
                Url::parse(&raw).map_err(|e| invalid("REMOTE_ENDPOINT", format!("{}", e)))?,
            ),
            None => None,
        };
        let cache_enabled = match get("ENABLE_CACHE") {
            Some(raw) => parse_flag("ENABLE_CACHE", &raw)?,
            None => defaults.remote.cache_enabled,
        };
        let remote = RemoteConfig {
            endpoint,
            api_key: get("REMOTE_API_KEY"),
            cache_enabled,
            cache_ttl: Duration::from_secs(parse_or(
                &get,
                "CACHE_TTL",
                defaults.remote.cache_ttl.as_secs(),
            )?),
            max_cache_size: parse_or(&get, "MAX_CACHE_SIZE", defaults.remote.max_cache_size)?,
        };
        remote.validate()?;

        Ok(Self {
            host,
            port,
            routing,
            execution,
            remote,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| invalid(name, format!("'{}': {}", raw, e))),
        None => Ok(default),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, format!("'{}' is not a boolean", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.routing.strategy, ExecutionStrategy::AutoSelect);
        assert_eq!(config.execution.request_timeout, Duration::from_secs(30));
        assert!(!config.remote.is_configured());
    }

    #[test]
    fn test_reads_recognized_variables() {
        let config = load(&[
            ("EXECUTION_STRATEGY", "local_first"),
            ("LOCAL_COMPLEXITY_THRESHOLD", "7"),
            ("LATENCY_THRESHOLD", "500"),
            ("LOCAL_CONFIDENCE_THRESHOLD", "0.85"),
            ("MAX_BATCH_SIZE", "10"),
            ("WORKER_THREADS", "8"),
            ("REQUEST_TIMEOUT", "5"),
            ("REMOTE_ENDPOINT", "https://api.foundry.azure.com"),
        ])
        .unwrap();

        assert_eq!(config.routing.strategy, ExecutionStrategy::LocalFirst);
        assert_eq!(config.routing.local_complexity_threshold, 7);
        assert_eq!(config.routing.latency_threshold_ms, 500);
        assert!((config.routing.local_confidence_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.execution.max_batch_size, 10);
        assert_eq!(config.execution.worker_threads, 8);
        assert_eq!(config.execution.request_timeout, Duration::from_secs(5));
        assert!(config.remote.is_configured());
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        assert!(matches!(
            load(&[("LOCAL_CONFIDENCE_THRESHOLD", "1.5")]),
            Err(ConfigError::InvalidValue(name, _)) if name == "LOCAL_CONFIDENCE_THRESHOLD"
        ));
        assert!(load(&[("LOCAL_CONFIDENCE_THRESHOLD", "NaN")]).is_err());
        assert!(load(&[("LOCAL_COMPLEXITY_THRESHOLD", "0")]).is_err());
        assert!(load(&[("LOCAL_COMPLEXITY_THRESHOLD", "11")]).is_err());
        assert!(load(&[("LATENCY_THRESHOLD", "0")]).is_err());
        assert!(load(&[("WORKER_THREADS", "0")]).is_err());
    }

    #[test]
    fn test_rejects_unparseable_values() {
        assert!(load(&[("EXECUTION_STRATEGY", "round_robin")]).is_err());
        assert!(load(&[("PORT", "http")]).is_err());
        assert!(load(&[("REMOTE_ENDPOINT", "not a url")]).is_err());
    }

    #[test]
    fn test_foundry_endpoint_fallback() {
        let config = load(&[("AZURE_FOUNDRY_ENDPOINT", "https://example.test/")]).unwrap();
        assert_eq!(
            config.remote.endpoint.as_ref().map(Url::as_str),
            Some("https://example.test/")
        );
    }

    #[test]
    fn test_cache_settings() {
        let config = load(&[]).unwrap();
        assert!(config.remote.cache_enabled);
        assert_eq!(config.remote.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.remote.max_cache_size, 1000);

        let config = load(&[
            ("ENABLE_CACHE", "FALSE"),
            ("CACHE_TTL", "60"),
            ("MAX_CACHE_SIZE", "5"),
        ])
        .unwrap();
        assert!(!config.remote.cache_enabled);
        assert_eq!(config.remote.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.remote.max_cache_size, 5);

        assert!(load(&[("ENABLE_CACHE", "maybe")]).is_err());
        assert!(load(&[("MAX_CACHE_SIZE", "0")]).is_err());
        assert!(load(&[("CACHE_TTL", "0")]).is_err());
        assert!(load(&[("ENABLE_CACHE", "false"), ("CACHE_TTL", "0")]).is_ok());
    }
}
