//! Orchestrator configuration.
//!
//! Values come from defaults, optionally overlaid with `REELFLOW_*`
//! environment variables.

use crate::admission::BackpressurePolicy;
use crate::errors::ConfigError;
use crate::observability::LogFormat;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable for [`OrchestratorConfig::max_concurrent_runs`].
pub const ENV_MAX_CONCURRENT_RUNS: &str = "REELFLOW_MAX_CONCURRENT_RUNS";
/// Environment variable for [`OrchestratorConfig::backpressure`].
pub const ENV_BACKPRESSURE: &str = "REELFLOW_BACKPRESSURE";
/// Environment variable for the retry attempt count.
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "REELFLOW_RETRY_MAX_ATTEMPTS";
/// Environment variable for the retry base delay.
pub const ENV_RETRY_BASE_DELAY_MS: &str = "REELFLOW_RETRY_BASE_DELAY_MS";
/// Environment variable for [`OrchestratorConfig::stage_timeout_secs`].
pub const ENV_STAGE_TIMEOUT_SECS: &str = "REELFLOW_STAGE_TIMEOUT_SECS";
/// Environment variable for [`OrchestratorConfig::broadcast_capacity`].
pub const ENV_BROADCAST_CAPACITY: &str = "REELFLOW_BROADCAST_CAPACITY";
/// Environment variable for [`OrchestratorConfig::state_dir`].
pub const ENV_STATE_DIR: &str = "REELFLOW_STATE_DIR";
/// Environment variable for [`OrchestratorConfig::log_format`].
pub const ENV_LOG_FORMAT: &str = "REELFLOW_LOG_FORMAT";

/// Settings for a [`PipelineService`](crate::service::PipelineService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum runs executing at once across all projects.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// What happens to a run request when every slot is taken.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    /// Retry policy for transient stage errors.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-attempt stage timeout. `None` disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<f64>,
    /// Buffered progress events per project before slow subscribers lag.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Directory of the file store. `None` keeps state in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

const fn default_max_concurrent_runs() -> usize {
    3
}

const fn default_broadcast_capacity() -> usize {
    crate::events::DEFAULT_BROADCAST_CAPACITY
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            backpressure: BackpressurePolicy::default(),
            retry: RetryConfig::default(),
            stage_timeout_secs: None,
            broadcast_capacity: default_broadcast_capacity(),
            state_dir: None,
            log_format: LogFormat::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the process environment, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each
    /// `REELFLOW_*` key, then validated. Blank values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_MAX_CONCURRENT_RUNS) {
            config.max_concurrent_runs = parse(ENV_MAX_CONCURRENT_RUNS, &raw)?;
        }
        if let Some(raw) = get(ENV_BACKPRESSURE) {
            config.backpressure = raw
                .parse()
                .map_err(|e: String| ConfigError::invalid_value(ENV_BACKPRESSURE, &raw, e))?;
        }
        if let Some(raw) = get(ENV_RETRY_MAX_ATTEMPTS) {
            config.retry.max_attempts = parse(ENV_RETRY_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = get(ENV_RETRY_BASE_DELAY_MS) {
            config.retry.base_delay_ms = parse(ENV_RETRY_BASE_DELAY_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_STAGE_TIMEOUT_SECS) {
            config.stage_timeout_secs = Some(parse(ENV_STAGE_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = get(ENV_BROADCAST_CAPACITY) {
            config.broadcast_capacity = parse(ENV_BROADCAST_CAPACITY, &raw)?;
        }
        if let Some(raw) = get(ENV_STATE_DIR) {
            config.state_dir = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = get(ENV_LOG_FORMAT) {
            config.log_format = raw
                .parse()
                .map_err(|e: String| ConfigError::invalid_value(ENV_LOG_FORMAT, &raw, e))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_max_concurrent_runs(mut self, limit: usize) -> Self {
        self.max_concurrent_runs = limit;
        self
    }

    /// Sets the backpressure policy.
    #[must_use]
    pub const fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt stage timeout in seconds.
    #[must_use]
    pub const fn with_stage_timeout_secs(mut self, secs: Option<f64>) -> Self {
        self.stage_timeout_secs = secs;
        self
    }

    /// Sets the per-project event buffer.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Sets the file store directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Sets the log format.
    #[must_use]
    pub const fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// The stage timeout as a duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broadcast_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.stage_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "stage_timeout_secs must be positive, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_value(key, raw, e.to_string()))
}
