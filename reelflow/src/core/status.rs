//! Project status and pipeline stage enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One ordered step of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Turn the prompt into a scene-by-scene script.
    Script,
    /// Assign a voice to every speaker in the script.
    Casting,
    /// Synthesize audio (and optionally images) for the script.
    Assets,
    /// Render the final media file.
    Compose,
    /// Upload the composed media to the remote platform.
    Publish,
}

impl PipelineStage {
    /// All stages in canonical forward order.
    pub const ALL: [Self; 5] = [
        Self::Script,
        Self::Casting,
        Self::Assets,
        Self::Compose,
        Self::Publish,
    ];

    /// Zero-based position in the canonical order.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Script => 0,
            Self::Casting => 1,
            Self::Assets => 2,
            Self::Compose => 3,
            Self::Publish => 4,
        }
    }

    /// The status a project holds while this stage executes.
    #[must_use]
    pub const fn active_status(self) -> ProjectStatus {
        match self {
            Self::Script => ProjectStatus::GeneratingScript,
            Self::Casting => ProjectStatus::Casting,
            Self::Assets => ProjectStatus::GeneratingAssets,
            Self::Compose => ProjectStatus::ComposingMedia,
            Self::Publish => ProjectStatus::Publishing,
        }
    }

    /// Stable name used in logs and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Casting => "casting",
            Self::Assets => "assets",
            Self::Compose => "compose",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script" | "generating_script" => Ok(Self::Script),
            "casting" => Ok(Self::Casting),
            "assets" | "generating_assets" => Ok(Self::Assets),
            "compose" | "composing_media" => Ok(Self::Compose),
            "publish" | "publishing" => Ok(Self::Publish),
            other => Err(format!("unknown pipeline stage '{other}'")),
        }
    }
}

/// The lifecycle status of a project.
///
/// The happy path is `Draft → GeneratingScript → Casting → GeneratingAssets →
/// ComposingMedia → Completed → Publishing → Published`. `Failed` and
/// `Cancelled` are absorbing and reachable from every non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created, no run has started yet.
    #[default]
    Draft,
    /// Script stage running.
    GeneratingScript,
    /// Casting stage running.
    Casting,
    /// Asset stage running.
    GeneratingAssets,
    /// Compose stage running.
    ComposingMedia,
    /// Media composed; publishing may follow.
    Completed,
    /// Publish stage running.
    Publishing,
    /// Media published remotely.
    Published,
    /// A stage failed.
    Failed,
    /// The run was cancelled on request.
    Cancelled,
}

impl ProjectStatus {
    /// Position on the happy path, `None` for `Failed` and `Cancelled`.
    #[must_use]
    pub const fn happy_path_rank(self) -> Option<usize> {
        match self {
            Self::Draft => Some(0),
            Self::GeneratingScript => Some(1),
            Self::Casting => Some(2),
            Self::GeneratingAssets => Some(3),
            Self::ComposingMedia => Some(4),
            Self::Completed => Some(5),
            Self::Publishing => Some(6),
            Self::Published => Some(7),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// True while a stage executor owns the project.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::GeneratingScript
                | Self::Casting
                | Self::GeneratingAssets
                | Self::ComposingMedia
                | Self::Publishing
        )
    }

    /// True for absorbing statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Cancelled)
    }

    /// True when no run is in flight and a regeneration may begin.
    #[must_use]
    pub const fn is_resting(self) -> bool {
        !self.is_active()
    }

    /// The stage executing while in this status, if any.
    #[must_use]
    pub const fn stage(self) -> Option<PipelineStage> {
        match self {
            Self::GeneratingScript => Some(PipelineStage::Script),
            Self::Casting => Some(PipelineStage::Casting),
            Self::GeneratingAssets => Some(PipelineStage::Assets),
            Self::ComposingMedia => Some(PipelineStage::Compose),
            Self::Publishing => Some(PipelineStage::Publish),
            _ => None,
        }
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::GeneratingScript => "generating_script",
            Self::Casting => "casting",
            Self::GeneratingAssets => "generating_assets",
            Self::ComposingMedia => "composing_media",
            Self::Completed => "completed",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
