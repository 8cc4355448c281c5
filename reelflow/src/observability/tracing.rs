//! Tracing subscriber setup and stage timing.

use crate::core::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Honors `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`]. Returns `false`
/// if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    result.is_ok()
}

/// Measures how long one stage attempt takes.
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
    stage: PipelineStage,
}

impl StageTimer {
    /// Starts timing a stage.
    #[must_use]
    pub fn start(stage: PipelineStage) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// The timed stage.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Stops the timer, logs the outcome, and returns the duration.
    pub fn finish(self, succeeded: bool) -> f64 {
        let duration_ms = self.elapsed_ms();
        if succeeded {
            tracing::info!(stage = %self.stage, duration_ms, "Stage finished");
        } else {
            tracing::warn!(stage = %self.stage, duration_ms, "Stage failed");
        }
        duration_ms
    }
}
