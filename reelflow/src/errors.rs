//! Error types for reelflow.
//!
//! Each concern gets its own error type; [`ReelflowError`] folds them
//! together for callers that only need one.

use crate::core::{PipelineStage, ProjectId, ProjectStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for reelflow operations.
#[derive(Debug, Error)]
pub enum ReelflowError {
    /// A request was rejected before anything was mutated.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A stage executor failed.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// The project store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// An illegal state-machine move was attempted.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A run could not be admitted.
    #[error("{0}")]
    Admission(#[from] AdmissionError),

    /// Configuration was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReelflowError {
    /// True for errors raised before any state was touched.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Admission(_) | Self::Config(_))
    }
}

/// Raised when a request fails its preconditions. Nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// The project the request targeted, when known.
    pub project_id: Option<ProjectId>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            project_id: None,
        }
    }

    /// Sets the targeted project.
    #[must_use]
    pub const fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

/// A failure reported by a stage executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Worth retrying: timeouts, rate limits, flaky upstreams.
    #[error("{stage} stage hit a transient error: {message}")]
    Transient {
        /// Failing stage.
        stage: PipelineStage,
        /// Description.
        message: String,
    },

    /// Retrying will not help.
    #[error("{stage} stage failed: {message}")]
    Fatal {
        /// Failing stage.
        stage: PipelineStage,
        /// Description.
        message: String,
    },

    /// The executor observed a cancellation request and stopped early.
    #[error("{stage} stage cancelled")]
    Cancelled {
        /// Interrupted stage.
        stage: PipelineStage,
    },
}

impl ExecutionError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self::Fatal {
            stage,
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled(stage: PipelineStage) -> Self {
        Self::Cancelled { stage }
    }

    /// Classifies a provider failure for a stage.
    #[must_use]
    pub fn from_provider(stage: PipelineStage, err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::Transient => Self::Transient {
                stage,
                message: err.message,
            },
            ProviderErrorKind::Fatal => Self::Fatal {
                stage,
                message: err.message,
            },
        }
    }

    /// The stage that raised the error.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        match self {
            Self::Transient { stage, .. } | Self::Fatal { stage, .. } | Self::Cancelled { stage } => {
                *stage
            }
        }
    }

    /// True if a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// True if the executor stopped because of a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Converts a transient error into a fatal one after retries ran out.
    #[must_use]
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Transient { stage, message } => Self::Fatal { stage, message },
            other => other,
        }
    }
}

/// Raised when a status change is not allowed by the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition '{attempted}' from status {from}")]
pub struct TransitionError {
    /// Status the project held.
    pub from: ProjectStatus,
    /// The rejected transition.
    pub attempted: String,
}

impl TransitionError {
    /// Creates a new transition error.
    #[must_use]
    pub fn new(from: ProjectStatus, attempted: impl Into<String>) -> Self {
        Self {
            from,
            attempted: attempted.into(),
        }
    }
}

/// A project record that breaks its own invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("project {project_id} violates an invariant: {message}")]
pub struct InvariantViolation {
    /// Offending project.
    pub project_id: ProjectId,
    /// What is wrong.
    pub message: String,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(project_id: ProjectId, message: impl Into<String>) -> Self {
        Self {
            project_id,
            message: message.into(),
        }
    }
}

/// Infrastructure failures of the project store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No project with this id.
    #[error("project {0} not found")]
    NotFound(ProjectId),

    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write would persist an inconsistent record.
    #[error("{0}")]
    InvariantViolation(#[from] InvariantViolation),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True if the project simply does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Reasons a run was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The project already has an active or queued run.
    #[error("project {0} already has an active run")]
    ProjectBusy(ProjectId),

    /// Every run slot is taken and the policy is to reject.
    #[error("system at capacity ({limit} concurrent runs)")]
    AtCapacity {
        /// Configured bound.
        limit: usize,
    },

    /// The controller was shut down.
    #[error("admission controller closed")]
    Closed,
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A single setting could not be parsed or is out of range.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration as a whole is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// How a provider failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Retrying may succeed.
    Transient,
    /// Retrying will not help.
    Fatal,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// An error returned by an external capability provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    /// Classification.
    pub kind: ProviderErrorKind,
    /// Description.
    pub message: String,
}

impl ProviderError {
    /// Creates a transient provider error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a fatal provider error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// True if retrying may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::Transient)
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ReelflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        let err = ExecutionError::from_provider(
            PipelineStage::Assets,
            ProviderError::transient("rate limited"),
        );
        assert!(err.is_transient());
        assert_eq!(err.stage(), PipelineStage::Assets);

        let err = ExecutionError::from_provider(PipelineStage::Script, ProviderError::fatal("bad"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_into_fatal() {
        let err = ExecutionError::transient(PipelineStage::Compose, "timeout").into_fatal();
        assert!(matches!(err, ExecutionError::Fatal { .. }));
        assert_eq!(err.to_string(), "compose stage failed: timeout");
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError::new(ProjectStatus::Casting, "advance to completed");
        assert_eq!(
            err.to_string(),
            "illegal transition 'advance to completed' from status casting"
        );
    }

    #[test]
    fn test_reelflow_error_from_conversions() {
        let err: ReelflowError = ValidationError::new("bad resume point").into();
        assert!(err.is_rejection());
        assert_eq!(err.to_string(), "bad resume point");

        let err: ReelflowError = StoreError::Unavailable("down".into()).into();
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_admission_error_display() {
        let err = AdmissionError::AtCapacity { limit: 3 };
        assert_eq!(err.to_string(), "system at capacity (3 concurrent runs)");
    }
}
