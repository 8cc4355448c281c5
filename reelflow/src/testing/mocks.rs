//! Scripted capability providers for tests.
//!
//! Each provider counts its calls, can be told to fail a number of times,
//! and can be held at a [`Gate`] until the test releases it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

use crate::core::{
    Asset, AssetSet, Cast, MediaArtifact, PublishMetadata, PublishReceipt, Script, VoiceConfig,
};
use crate::errors::ProviderError;
use crate::stages::providers::{
    AssetConfig, AssetProvider, ComposeConfig, CompositionProvider, PublishProvider,
    ScriptProvider, VoiceProvider,
};
use crate::stages::Providers;

use super::fixtures::sample_script;

/// Holds provider calls until released.
#[derive(Debug, Clone)]
pub struct Gate {
    released: Arc<watch::Sender<bool>>,
    entered: Arc<Semaphore>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (released, _) = watch::channel(false);
        Self {
            released: Arc::new(released),
            entered: Arc::new(Semaphore::new(0)),
        }
    }

    /// Opens the gate for every current and future call.
    pub fn release(&self) {
        self.released.send_replace(true);
    }

    /// Whether the gate has been opened.
    #[must_use]
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Waits until a call has reached the gate.
    pub async fn entered(&self) {
        if let Ok(permit) = self.entered.acquire().await {
            permit.forget();
        }
    }

    async fn pass(&self) {
        self.entered.add_permits(1);
        let mut rx = self.released.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Call counting and failure scripting shared by the scripted providers.
#[derive(Debug, Default)]
pub struct ProviderControl {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<ProviderError>>,
    always: Mutex<Option<ProviderError>>,
    gate: Mutex<Option<Gate>>,
}

impl ProviderControl {
    /// Number of calls so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fails the next call with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: ProviderError) {
        self.failures.lock().push_back(error);
    }

    /// Fails the next `times` calls with `error`.
    pub fn fail_times(&self, times: usize, error: &ProviderError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(times).cloned());
    }

    /// Fails every call with `error` once the queued failures run out.
    pub fn fail_always(&self, error: ProviderError) {
        *self.always.lock() = Some(error);
    }

    /// Removes all scripted failures.
    pub fn succeed(&self) {
        self.failures.lock().clear();
        *self.always.lock() = None;
    }

    /// Holds subsequent calls at a new gate and returns it.
    pub fn hold(&self) -> Gate {
        let gate = Gate::new();
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    async fn enter(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        match self.always.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Returns a fixed script for every prompt.
#[derive(Debug)]
pub struct ScriptedScriptProvider {
    script: Script,
    prompts: Mutex<Vec<String>>,
    control: ProviderControl,
}

impl Default for ScriptedScriptProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedScriptProvider {
    /// Returns [`sample_script`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: sample_script(),
            prompts: Mutex::new(Vec::new()),
            control: ProviderControl::default(),
        }
    }

    /// Returns `script` instead.
    #[must_use]
    pub fn with_script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Call and failure control.
    #[must_use]
    pub fn control(&self) -> &ProviderControl {
        &self.control
    }
}

#[async_trait]
impl ScriptProvider for ScriptedScriptProvider {
    async fn generate_script(&self, prompt: &str) -> Result<Script, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        self.control.enter().await?;
        Ok(self.script.clone())
    }
}

/// Casts every speaker, or returns a fixed cast.
#[derive(Debug, Default)]
pub struct ScriptedVoiceProvider {
    cast: Option<Cast>,
    control: ProviderControl,
}

impl ScriptedVoiceProvider {
    /// Gives each speaker a voice named after them.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `cast` for every script.
    #[must_use]
    pub fn with_cast(mut self, cast: Cast) -> Self {
        self.cast = Some(cast);
        self
    }

    /// Call and failure control.
    #[must_use]
    pub fn control(&self) -> &ProviderControl {
        &self.control
    }
}

#[async_trait]
impl VoiceProvider for ScriptedVoiceProvider {
    async fn cast_voices(&self, script: &Script) -> Result<Cast, ProviderError> {
        self.control.enter().await?;
        if let Some(cast) = &self.cast {
            return Ok(cast.clone());
        }
        Ok(script.speakers().into_iter().fold(Cast::new(), |cast, speaker| {
            let voice = VoiceConfig::new(format!("voice-{}", speaker.to_lowercase()));
            cast.with_voice(speaker, voice)
        }))
    }
}

/// Produces one audio clip per scene, or a fixed asset set.
#[derive(Debug, Default)]
pub struct ScriptedAssetProvider {
    assets: Option<AssetSet>,
    configs: Mutex<Vec<AssetConfig>>,
    control: ProviderControl,
}

impl ScriptedAssetProvider {
    /// Narrates every scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `assets` for every request.
    #[must_use]
    pub fn with_assets(mut self, assets: AssetSet) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Asset configurations received so far.
    #[must_use]
    pub fn configs(&self) -> Vec<AssetConfig> {
        self.configs.lock().clone()
    }

    /// Call and failure control.
    #[must_use]
    pub fn control(&self) -> &ProviderControl {
        &self.control
    }
}

#[async_trait]
impl AssetProvider for ScriptedAssetProvider {
    async fn synthesize_assets(
        &self,
        script: &Script,
        _cast: &Cast,
        config: &AssetConfig,
    ) -> Result<AssetSet, ProviderError> {
        self.configs.lock().push(config.clone());
        self.control.enter().await?;
        if let Some(assets) = &self.assets {
            return Ok(assets.clone());
        }
        Ok(AssetSet::new(
            script
                .scenes
                .iter()
                .enumerate()
                .map(|(i, scene)| Asset::audio(format!("audio/scene-{i}.mp3"), &scene.speaker, i))
                .collect(),
        ))
    }
}

/// Composes to a fixed locator.
#[derive(Debug)]
pub struct ScriptedCompositionProvider {
    locator: String,
    requests: Mutex<Vec<(AssetSet, ComposeConfig)>>,
    control: ProviderControl,
}

impl Default for ScriptedCompositionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCompositionProvider {
    /// Composes to `media/final.mp4`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locator: "media/final.mp4".to_string(),
            requests: Mutex::new(Vec::new()),
            control: ProviderControl::default(),
        }
    }

    /// Composes to `locator` instead.
    #[must_use]
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = locator.into();
        self
    }

    /// Asset sets and configurations received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<(AssetSet, ComposeConfig)> {
        self.requests.lock().clone()
    }

    /// Call and failure control.
    #[must_use]
    pub fn control(&self) -> &ProviderControl {
        &self.control
    }
}

#[async_trait]
impl CompositionProvider for ScriptedCompositionProvider {
    async fn compose_media(
        &self,
        script: &Script,
        _cast: &Cast,
        assets: &AssetSet,
        config: &ComposeConfig,
    ) -> Result<MediaArtifact, ProviderError> {
        self.requests.lock().push((assets.clone(), config.clone()));
        self.control.enter().await?;
        Ok(MediaArtifact::new(&self.locator).with_duration(script.total_duration_secs()))
    }
}

/// Publishes under a fake video host.
#[derive(Debug, Default)]
pub struct ScriptedPublishProvider {
    published: Mutex<Vec<PublishMetadata>>,
    control: ProviderControl,
}

impl ScriptedPublishProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of every successful publish.
    #[must_use]
    pub fn published(&self) -> Vec<PublishMetadata> {
        self.published.lock().clone()
    }

    /// Call and failure control.
    #[must_use]
    pub fn control(&self) -> &ProviderControl {
        &self.control
    }
}

#[async_trait]
impl PublishProvider for ScriptedPublishProvider {
    async fn publish(
        &self,
        media: &MediaArtifact,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt, ProviderError> {
        self.control.enter().await?;
        let mut published = self.published.lock();
        published.push(metadata.clone());
        let remote_id = format!("video-{}", published.len());
        Ok(PublishReceipt::new(
            &remote_id,
            format!("https://videos.example.com/{remote_id}/{}", media.locator),
        ))
    }
}

/// One scripted provider per stage, kept as concrete types so tests can
/// steer them after wiring.
#[derive(Debug, Clone)]
pub struct ScriptedProviders {
    /// Script provider.
    pub script: Arc<ScriptedScriptProvider>,
    /// Voice provider.
    pub voice: Arc<ScriptedVoiceProvider>,
    /// Asset provider.
    pub assets: Arc<ScriptedAssetProvider>,
    /// Composition provider.
    pub composition: Arc<ScriptedCompositionProvider>,
    /// Publish provider.
    pub publish: Arc<ScriptedPublishProvider>,
}

impl Default for ScriptedProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProviders {
    /// Providers that all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(ScriptedScriptProvider::new()),
            voice: Arc::new(ScriptedVoiceProvider::new()),
            assets: Arc::new(ScriptedAssetProvider::new()),
            composition: Arc::new(ScriptedCompositionProvider::new()),
            publish: Arc::new(ScriptedPublishProvider::new()),
        }
    }

    /// Replaces the script provider.
    #[must_use]
    pub fn with_script(mut self, provider: ScriptedScriptProvider) -> Self {
        self.script = Arc::new(provider);
        self
    }

    /// Replaces the voice provider.
    #[must_use]
    pub fn with_voice(mut self, provider: ScriptedVoiceProvider) -> Self {
        self.voice = Arc::new(provider);
        self
    }

    /// Replaces the asset provider.
    #[must_use]
    pub fn with_assets(mut self, provider: ScriptedAssetProvider) -> Self {
        self.assets = Arc::new(provider);
        self
    }

    /// Replaces the composition provider.
    #[must_use]
    pub fn with_composition(mut self, provider: ScriptedCompositionProvider) -> Self {
        self.composition = Arc::new(provider);
        self
    }

    /// The providers as trait objects.
    #[must_use]
    pub fn providers(&self) -> Providers {
        Providers {
            script: self.script.clone(),
            voice: self.voice.clone(),
            assets: self.assets.clone(),
            composition: self.composition.clone(),
            publish: self.publish.clone(),
        }
    }

    /// Call counts in stage order.
    #[must_use]
    pub fn call_counts(&self) -> [usize; 5] {
        [
            self.script.control().calls(),
            self.voice.control().calls(),
            self.assets.control().calls(),
            self.composition.control().calls(),
            self.publish.control().calls(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_scripted_failures_run_in_order() {
        let provider = ScriptedScriptProvider::new();
        provider.control().fail_times(2, &ProviderError::transient("busy"));

        assert!(provider.generate_script("p").await.is_err());
        assert!(provider.generate_script("p").await.is_err());
        assert!(provider.generate_script("p").await.is_ok());
        assert_eq!(provider.control().calls(), 3);
        assert_eq!(provider.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_gate_holds_until_released() {
        let provider = Arc::new(ScriptedVoiceProvider::new());
        let gate = provider.control().hold();

        let task = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.cast_voices(&sample_script()).await })
        };
        gate.entered().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        gate.release();
        let cast = task.await.unwrap().unwrap();
        assert_eq!(cast.len(), 2);
    }

    #[tokio::test]
    async fn test_default_assets_narrate_every_scene() {
        let provider = ScriptedAssetProvider::new();
        let script = sample_script();
        let assets = provider
            .synthesize_assets(&script, &Cast::new(), &AssetConfig::default())
            .await
            .unwrap();
        assert_eq!(assets.len(), script.scenes.len());
        assert_eq!(provider.configs().len(), 1);
    }
}
