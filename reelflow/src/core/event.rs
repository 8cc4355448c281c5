//! Progress events pushed to live observers.

use super::status::ProjectStatus;
use serde::{Deserialize, Serialize};

/// A progress notification for one project.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"status_change","status":"casting","progress":0.25}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The project moved to a new status.
    StatusChange {
        /// New status.
        status: ProjectStatus,
        /// Run progress in `[0, 1]`.
        progress: f64,
    },
    /// A stage failed.
    Error {
        /// Failure description.
        message: String,
    },
    /// The media file was composed.
    Completed {
        /// Where the composed media lives.
        result_locator: String,
    },
    /// The media was published remotely.
    Published {
        /// Public URL of the published media.
        remote_url: String,
    },
}

impl ProgressEvent {
    /// Creates a `status_change` event, clamping progress into `[0, 1]`.
    #[must_use]
    pub fn status_change(status: ProjectStatus, progress: f64) -> Self {
        Self::StatusChange {
            status,
            progress: progress.clamp(0.0, 1.0),
        }
    }

    /// Creates an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Creates a `completed` event.
    #[must_use]
    pub fn completed(result_locator: impl Into<String>) -> Self {
        Self::Completed {
            result_locator: result_locator.into(),
        }
    }

    /// Creates a `published` event.
    #[must_use]
    pub fn published(remote_url: impl Into<String>) -> Self {
        Self::Published {
            remote_url: remote_url.into(),
        }
    }

    /// Wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChange { .. } => "status_change",
            Self::Error { .. } => "error",
            Self::Completed { .. } => "completed",
            Self::Published { .. } => "published",
        }
    }

    /// The status carried by a `status_change` event.
    #[must_use]
    pub const fn status(&self) -> Option<ProjectStatus> {
        match self {
            Self::StatusChange { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The progress carried by a `status_change` event.
    #[must_use]
    pub const fn progress(&self) -> Option<f64> {
        match self {
            Self::StatusChange { progress, .. } => Some(*progress),
            _ => None,
        }
    }
}
