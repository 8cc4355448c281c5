//! The five built-in stage executors.
//!
//! Each one calls its provider and checks the result before the orchestrator
//! persists it. Executors never touch the store.

use super::context::StageContext;
use super::providers::{
    AssetConfig, AssetProvider, ComposeConfig, CompositionProvider, PublishProvider,
    ScriptProvider, VoiceProvider,
};
use super::{StageExecutor, StageOutput};
use crate::core::{
    AssetKind, AssetSet, MediaArtifact, PipelineStage, Scene, Script, VoiceConfig,
    DEFAULT_SCENE_DURATION_SECS, MAX_SCENE_DURATION_SECS, MIN_SCENE_DURATION_SECS,
};
use crate::errors::ExecutionError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Voices handed out, in rotation, to speakers the voice provider skipped.
/// Voices the provider already assigned are passed over.
pub const FALLBACK_VOICES: [&str; 2] = ["en-US-ChristopherNeural", "en-US-MichelleNeural"];

/// Generates the script from the project prompt.
#[derive(Debug, Clone)]
pub struct ScriptWriter {
    provider: Arc<dyn ScriptProvider>,
}

impl ScriptWriter {
    /// Creates a script writer.
    #[must_use]
    pub fn new(provider: Arc<dyn ScriptProvider>) -> Self {
        Self { provider }
    }

    /// Validates scenes and normalizes their durations.
    pub fn normalize(script: Script) -> Result<Script, ExecutionError> {
        let stage = PipelineStage::Script;
        if script.scenes.is_empty() {
            return Err(ExecutionError::fatal(stage, "script has no scenes"));
        }

        let mut scenes = Vec::with_capacity(script.scenes.len());
        for (i, scene) in script.scenes.into_iter().enumerate() {
            let speaker = scene.speaker.trim().to_string();
            let text = scene.text.trim().to_string();
            if speaker.is_empty() {
                return Err(ExecutionError::fatal(stage, format!("scene {i} has no speaker")));
            }
            if text.is_empty() {
                return Err(ExecutionError::fatal(stage, format!("scene {i} has no text")));
            }
            let duration = if scene.duration_secs.is_finite() && scene.duration_secs > 0.0 {
                scene
                    .duration_secs
                    .clamp(MIN_SCENE_DURATION_SECS, MAX_SCENE_DURATION_SECS)
            } else {
                DEFAULT_SCENE_DURATION_SECS
            };
            scenes.push(Scene::new(speaker, text).with_duration(duration));
        }
        Ok(Script::new(scenes))
    }
}

#[async_trait]
impl StageExecutor for ScriptWriter {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Script
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let script = self
            .provider
            .generate_script(&ctx.settings.prompt)
            .await
            .map_err(|e| ExecutionError::from_provider(self.stage(), e))?;
        let script = Self::normalize(script)?;
        debug!(
            project_id = %ctx.project_id,
            scenes = script.scenes.len(),
            "Script generated"
        );
        Ok(StageOutput::Script(script))
    }
}

/// Assigns exactly one voice to every speaker in the script.
#[derive(Debug, Clone)]
pub struct CastingDirector {
    provider: Arc<dyn VoiceProvider>,
}

impl CastingDirector {
    /// Creates a casting director.
    #[must_use]
    pub fn new(provider: Arc<dyn VoiceProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageExecutor for CastingDirector {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Casting
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let script = ctx.require_script()?;
        let speakers = script.speakers();
        if speakers.is_empty() {
            return Err(ExecutionError::fatal(self.stage(), "script has no speakers"));
        }

        let mut cast = self
            .provider
            .cast_voices(script)
            .await
            .map_err(|e| ExecutionError::from_provider(self.stage(), e))?;

        let before = cast.len();
        cast.assignments.retain(|speaker, _| speakers.contains(speaker));
        if cast.len() < before {
            debug!(dropped = before - cast.len(), "Dropped voices for unknown speakers");
        }

        let missing: Vec<&String> = speakers
            .iter()
            .filter(|s| !cast.assignments.contains_key(*s))
            .collect();
        if !missing.is_empty() {
            warn!(
                project_id = %ctx.project_id,
                missing = missing.len(),
                "Voice provider skipped speakers, using fallback voices"
            );
        }
        let used: BTreeSet<String> = cast
            .assignments
            .values()
            .map(|v| v.voice_id.clone())
            .collect();
        let mut unused = FALLBACK_VOICES
            .iter()
            .filter(|v| !used.contains(**v))
            .copied()
            .collect::<Vec<_>>();
        if unused.is_empty() {
            // every fallback is taken, so sharing is unavoidable
            unused = FALLBACK_VOICES.to_vec();
        }
        for (i, speaker) in missing.into_iter().enumerate() {
            let voice = unused[i % unused.len()];
            cast.assignments
                .insert(speaker.clone(), VoiceConfig::new(voice));
        }

        Ok(StageOutput::Cast(cast))
    }
}

/// Synthesizes the audio (and images) for a cast script.
#[derive(Debug, Clone)]
pub struct AssetGenerator {
    provider: Arc<dyn AssetProvider>,
}

impl AssetGenerator {
    /// Creates an asset generator.
    #[must_use]
    pub fn new(provider: Arc<dyn AssetProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageExecutor for AssetGenerator {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Assets
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let stage = self.stage();
        let script = ctx.require_script()?;
        let cast = ctx.require_cast()?;
        let config = AssetConfig::new(ctx.settings.image_mode.clone());

        let assets = ctx
            .cancellable(async {
                self.provider
                    .synthesize_assets(script, cast, &config)
                    .await
                    .map_err(|e| ExecutionError::from_provider(stage, e))
            })
            .await?;

        if assets.count(AssetKind::Audio) == 0 {
            return Err(ExecutionError::fatal(stage, "no audio was produced"));
        }
        for asset in &assets.items {
            if let Some(ref speaker) = asset.speaker {
                if cast.voice_for(speaker).is_none() {
                    return Err(ExecutionError::fatal(
                        stage,
                        format!("asset for unknown speaker '{speaker}'"),
                    ));
                }
            }
            if asset.scene_index.is_some_and(|i| i >= script.scenes.len()) {
                return Err(ExecutionError::fatal(
                    stage,
                    format!("asset '{}' points past the last scene", asset.locator),
                ));
            }
        }

        Ok(StageOutput::Assets(assets))
    }
}

/// Renders the final media file.
#[derive(Debug, Clone)]
pub struct MediaComposer {
    provider: Arc<dyn CompositionProvider>,
}

impl MediaComposer {
    /// Creates a media composer.
    #[must_use]
    pub fn new(provider: Arc<dyn CompositionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageExecutor for MediaComposer {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Compose
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let stage = self.stage();
        let script = ctx.require_script()?;
        let cast = ctx.require_cast()?;
        // a regeneration sees the previous run's video in the latest set
        let assets = if ctx.settings.generate_assets {
            ctx.require_assets()?.without_video()
        } else {
            AssetSet::default()
        };
        let config = ComposeConfig::from_settings(&ctx.settings);
        debug!(
            project_id = %ctx.project_id,
            format = %config.video_format,
            assets = assets.len(),
            "Composing media"
        );

        let media: MediaArtifact = ctx
            .cancellable(async {
                self.provider
                    .compose_media(script, cast, &assets, &config)
                    .await
                    .map_err(|e| ExecutionError::from_provider(stage, e))
            })
            .await?;

        if media.locator.trim().is_empty() {
            return Err(ExecutionError::fatal(stage, "composer returned an empty locator"));
        }
        Ok(StageOutput::Media(media))
    }
}

/// Publishes the composed video.
#[derive(Debug, Clone)]
pub struct Publisher {
    provider: Arc<dyn PublishProvider>,
}

impl Publisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(provider: Arc<dyn PublishProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageExecutor for Publisher {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Publish
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
        let stage = self.stage();
        let metadata = ctx
            .settings
            .publish
            .as_ref()
            .ok_or_else(|| ExecutionError::fatal(stage, "publishing is not configured"))?;
        let video = ctx
            .assets()
            .and_then(AssetSet::video)
            .ok_or_else(|| ExecutionError::fatal(stage, "no composed video to publish"))?;
        let media = MediaArtifact::new(video.locator.clone());

        let receipt = self
            .provider
            .publish(&media, metadata)
            .await
            .map_err(|e| ExecutionError::from_provider(stage, e))?;
        if receipt.remote_url.trim().is_empty() {
            return Err(ExecutionError::fatal(stage, "publisher returned no url"));
        }
        Ok(StageOutput::Published(receipt))
    }
}
