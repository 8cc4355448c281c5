//! The project record and its state machine.

use super::outputs::PublishReceipt;
use super::status::{PipelineStage, ProjectStatus};
use crate::errors::{InvariantViolation, TransitionError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest accepted script prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 5000;

/// Opaque project identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Generates a new time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How still images are produced for the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ImageMode {
    /// One generated image per group of scenes.
    PerScene {
        /// How many consecutive scenes share an image.
        scenes_per_image: usize,
    },
    /// One generated image for the whole video.
    Single,
    /// A caller-supplied background image.
    Upload {
        /// Where the image lives.
        url: String,
    },
    /// No images.
    None,
}

impl Default for ImageMode {
    fn default() -> Self {
        Self::PerScene { scenes_per_image: 2 }
    }
}

/// Frame orientation of the composed video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    /// 16:9 landscape.
    #[default]
    Horizontal,
    /// 9:16 short-form.
    Vertical,
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Horizontal => write!(f, "horizontal"),
            Self::Vertical => write!(f, "vertical"),
        }
    }
}

/// Default background music volume.
pub const DEFAULT_MUSIC_VOLUME: f64 = 0.3;

/// Visibility of published media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Visible to everyone.
    Public,
    /// Visible to the owner only.
    #[default]
    Private,
    /// Visible with the link.
    Unlisted,
}

/// Metadata sent along with the media when publishing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishMetadata {
    /// Remote title.
    pub title: String,
    /// Remote description.
    #[serde(default)]
    pub description: String,
    /// Remote tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Remote visibility.
    #[serde(default)]
    pub privacy: Privacy,
}

impl PublishMetadata {
    /// Creates publish metadata with a title.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Per-project configuration fixed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Prompt handed to the script provider.
    pub prompt: String,
    /// Whether the asset stage runs at all.
    #[serde(default = "default_generate_assets")]
    pub generate_assets: bool,
    /// Image production mode for the asset stage.
    #[serde(default)]
    pub image_mode: ImageMode,
    /// Orientation of the composed video.
    #[serde(default)]
    pub video_format: VideoFormat,
    /// Looping background footage. Required for vertical video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_video_url: Option<String>,
    /// Music mixed under the narration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music_url: Option<String>,
    /// Background music volume in `[0, 1]`.
    #[serde(default = "default_music_volume")]
    pub music_volume: f64,
    /// Burn narration captions into the video.
    #[serde(default = "default_enable_captions")]
    pub enable_captions: bool,
    /// Publish after composing, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishMetadata>,
}

const fn default_generate_assets() -> bool {
    true
}

const fn default_music_volume() -> f64 {
    DEFAULT_MUSIC_VOLUME
}

const fn default_enable_captions() -> bool {
    true
}

impl ProjectSettings {
    /// Creates settings with defaults for everything but the prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            generate_assets: true,
            image_mode: ImageMode::default(),
            video_format: VideoFormat::default(),
            background_video_url: None,
            background_music_url: None,
            music_volume: DEFAULT_MUSIC_VOLUME,
            enable_captions: true,
            publish: None,
        }
    }

    /// Enables or disables the asset stage.
    #[must_use]
    pub fn with_generate_assets(mut self, enabled: bool) -> Self {
        self.generate_assets = enabled;
        self
    }

    /// Sets the image mode.
    #[must_use]
    pub fn with_image_mode(mut self, mode: ImageMode) -> Self {
        self.image_mode = mode;
        self
    }

    /// Sets the video orientation.
    #[must_use]
    pub fn with_video_format(mut self, format: VideoFormat) -> Self {
        self.video_format = format;
        self
    }

    /// Sets the background footage.
    #[must_use]
    pub fn with_background_video(mut self, url: impl Into<String>) -> Self {
        self.background_video_url = Some(url.into());
        self
    }

    /// Sets the background music and its volume.
    #[must_use]
    pub fn with_background_music(mut self, url: impl Into<String>, volume: f64) -> Self {
        self.background_music_url = Some(url.into());
        self.music_volume = volume;
        self
    }

    /// Enables or disables burned-in captions.
    #[must_use]
    pub fn with_captions(mut self, enabled: bool) -> Self {
        self.enable_captions = enabled;
        self
    }

    /// Enables publishing with the given metadata.
    #[must_use]
    pub fn with_publish(mut self, metadata: PublishMetadata) -> Self {
        self.publish = Some(metadata);
        self
    }

    /// Whether a stage belongs to this project's pipeline.
    #[must_use]
    pub const fn stage_enabled(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Assets => self.generate_assets,
            PipelineStage::Publish => self.publish.is_some(),
            PipelineStage::Script | PipelineStage::Casting | PipelineStage::Compose => true,
        }
    }

    /// Checks the settings before a project is created.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::new("script prompt must not be empty"));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ValidationError::new(format!(
                "script prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        match &self.image_mode {
            ImageMode::PerScene { scenes_per_image: 0 } => {
                return Err(ValidationError::new("scenes_per_image must be at least 1"));
            }
            ImageMode::Upload { url } if url.trim().is_empty() => {
                return Err(ValidationError::new("upload image mode requires a url"));
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.music_volume) {
            return Err(ValidationError::new("music_volume must be between 0 and 1"));
        }
        for (field, url) in [
            ("background_video_url", &self.background_video_url),
            ("background_music_url", &self.background_music_url),
        ] {
            if url.as_deref().is_some_and(|u| u.trim().is_empty()) {
                return Err(ValidationError::new(format!("{field} must not be blank")));
            }
        }
        if self.video_format == VideoFormat::Vertical && self.background_video_url.is_none() {
            return Err(ValidationError::new(
                "vertical video requires a background video",
            ));
        }
        if let Some(ref publish) = self.publish {
            if publish.title.trim().is_empty() {
                return Err(ValidationError::new("publish title must not be empty"));
            }
        }
        Ok(())
    }
}

/// A request to create a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    /// Display title.
    pub title: String,
    /// Pipeline settings.
    pub settings: ProjectSettings,
}

impl NewProject {
    /// Creates a project request.
    #[must_use]
    pub fn new(title: impl Into<String>, settings: ProjectSettings) -> Self {
        Self {
            title: title.into(),
            settings,
        }
    }
}

/// A requested change of project status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Begin a run at `stage`. Only legal from a resting status.
    Enter(PipelineStage),
    /// Move to the next status on the happy path.
    Advance(ProjectStatus),
    /// `publishing → published`, recording the remote identifiers.
    Publish(PublishReceipt),
    /// Record a failure.
    Fail(String),
    /// Record a cancellation.
    Cancel,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter(stage) => write!(f, "enter {stage}"),
            Self::Advance(status) => write!(f, "advance to {status}"),
            Self::Publish(_) => write!(f, "publish"),
            Self::Fail(_) => write!(f, "fail"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// The unit of work tracked end to end through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Identity.
    pub id: ProjectId,
    /// Display title.
    pub title: String,
    /// Current status.
    pub status: ProjectStatus,
    /// Set if and only if the status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set if and only if the status is `published`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishReceipt>,
    /// Pipeline settings.
    pub settings: ProjectSettings,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Creates a draft project.
    #[must_use]
    pub fn new(request: NewProject) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            title: request.title,
            status: ProjectStatus::Draft,
            error_message: None,
            publish: None,
            settings: request.settings,
            created_at: now,
            updated_at: now,
        }
    }

    /// The status that follows the current one on this project's happy path.
    ///
    /// `None` when the next move needs more than a plain advance (publishing
    /// needs a receipt) or when the project is at rest.
    #[must_use]
    pub fn next_status(&self) -> Option<ProjectStatus> {
        match self.status {
            ProjectStatus::Draft => Some(ProjectStatus::GeneratingScript),
            ProjectStatus::GeneratingScript => Some(ProjectStatus::Casting),
            ProjectStatus::Casting if self.settings.generate_assets => {
                Some(ProjectStatus::GeneratingAssets)
            }
            ProjectStatus::Casting | ProjectStatus::GeneratingAssets => {
                Some(ProjectStatus::ComposingMedia)
            }
            ProjectStatus::ComposingMedia => Some(ProjectStatus::Completed),
            ProjectStatus::Completed if self.settings.publish.is_some() => {
                Some(ProjectStatus::Publishing)
            }
            _ => None,
        }
    }

    /// Applies a transition, or leaves the project untouched and reports why not.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        let from = self.status;
        let illegal = |t: &Transition| TransitionError::new(from, t.to_string());

        match transition {
            Transition::Enter(stage) => {
                if !from.is_resting() || !self.settings.stage_enabled(stage) {
                    return Err(illegal(&transition));
                }
                self.status = stage.active_status();
                self.error_message = None;
                self.publish = None;
            }
            Transition::Advance(next) => {
                if self.next_status() != Some(next) {
                    return Err(illegal(&transition));
                }
                self.status = next;
            }
            Transition::Publish(receipt) => {
                if from != ProjectStatus::Publishing {
                    return Err(TransitionError::new(from, "publish"));
                }
                self.status = ProjectStatus::Published;
                self.publish = Some(receipt);
            }
            Transition::Fail(message) => {
                if from.is_terminal() {
                    return Err(TransitionError::new(from, "fail"));
                }
                let message = if message.trim().is_empty() {
                    "unknown error".to_string()
                } else {
                    message
                };
                self.status = ProjectStatus::Failed;
                self.error_message = Some(message);
                self.publish = None;
            }
            Transition::Cancel => {
                if from.is_terminal() {
                    return Err(illegal(&transition));
                }
                self.status = ProjectStatus::Cancelled;
                self.error_message = None;
                self.publish = None;
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Verifies the record-level invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let failed = self.status == ProjectStatus::Failed;
        if self.error_message.is_some() != failed {
            return Err(InvariantViolation::new(
                self.id,
                format!("error_message present={} with status {}", self.error_message.is_some(), self.status),
            ));
        }
        let published = self.status == ProjectStatus::Published;
        if self.publish.is_some() != published {
            return Err(InvariantViolation::new(
                self.id,
                format!("publish identifiers present={} with status {}", self.publish.is_some(), self.status),
            ));
        }
        Ok(())
    }
}
