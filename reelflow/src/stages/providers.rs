//! External capability providers injected into the stage executors.
//!
//! Each provider wraps one outside service (text generation, speech
//! synthesis, image generation, rendering, publishing). Providers are
//! stateless from the orchestrator's point of view and never see the store.

use crate::core::{
    AssetSet, Cast, ImageMode, MediaArtifact, ProjectSettings, PublishMetadata, PublishReceipt,
    Script, VideoFormat, DEFAULT_MUSIC_VOLUME,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub use crate::errors::{ProviderError, ProviderErrorKind};

/// Options forwarded to the asset provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetConfig {
    /// How still images should be produced.
    pub image_mode: ImageMode,
}

impl AssetConfig {
    /// Creates an asset config.
    #[must_use]
    pub const fn new(image_mode: ImageMode) -> Self {
        Self { image_mode }
    }
}

/// Options forwarded to the composition provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Frame orientation.
    pub video_format: VideoFormat,
    /// Background footage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_video_url: Option<String>,
    /// Background music.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music_url: Option<String>,
    /// Music volume in `[0, 1]`.
    pub music_volume: f64,
    /// Whether captions are burned in.
    pub enable_captions: bool,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            video_format: VideoFormat::default(),
            background_video_url: None,
            background_music_url: None,
            music_volume: DEFAULT_MUSIC_VOLUME,
            enable_captions: true,
        }
    }
}

impl ComposeConfig {
    /// Takes the compose options from a project's settings.
    #[must_use]
    pub fn from_settings(settings: &ProjectSettings) -> Self {
        Self {
            video_format: settings.video_format,
            background_video_url: settings.background_video_url.clone(),
            background_music_url: settings.background_music_url.clone(),
            music_volume: settings.music_volume,
            enable_captions: settings.enable_captions,
        }
    }
}

/// Turns a prompt into a script.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptProvider: Send + Sync + Debug {
    /// Generates a script for `prompt`.
    async fn generate_script(&self, prompt: &str) -> Result<Script, ProviderError>;
}

/// Chooses voices for a script's speakers.
#[async_trait]
pub trait VoiceProvider: Send + Sync + Debug {
    /// Proposes a voice per speaker. May leave speakers out.
    async fn cast_voices(&self, script: &Script) -> Result<Cast, ProviderError>;
}

/// Synthesizes audio and images.
#[async_trait]
pub trait AssetProvider: Send + Sync + Debug {
    /// Produces the media assets for a cast script.
    async fn synthesize_assets(
        &self,
        script: &Script,
        cast: &Cast,
        config: &AssetConfig,
    ) -> Result<AssetSet, ProviderError>;
}

/// Renders the final media file.
#[async_trait]
pub trait CompositionProvider: Send + Sync + Debug {
    /// Composes the media.
    ///
    /// `assets` never holds a previously composed video and is empty when
    /// asset generation is disabled.
    async fn compose_media(
        &self,
        script: &Script,
        cast: &Cast,
        assets: &AssetSet,
        config: &ComposeConfig,
    ) -> Result<MediaArtifact, ProviderError>;
}

/// Uploads composed media to a remote platform.
#[async_trait]
pub trait PublishProvider: Send + Sync + Debug {
    /// Publishes `media` and returns the remote identifiers.
    async fn publish(
        &self,
        media: &MediaArtifact,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt, ProviderError>;
}
