//! The fixed, ordered set of stage executors.

use super::executors::{AssetGenerator, CastingDirector, MediaComposer, Publisher, ScriptWriter};
use super::providers::{
    AssetProvider, CompositionProvider, PublishProvider, ScriptProvider, VoiceProvider,
};
use super::StageExecutor;
use crate::core::PipelineStage;
use crate::errors::ValidationError;
use std::sync::Arc;

/// The external services behind the built-in executors.
#[derive(Debug, Clone)]
pub struct Providers {
    /// Script generation.
    pub script: Arc<dyn ScriptProvider>,
    /// Voice casting.
    pub voice: Arc<dyn VoiceProvider>,
    /// Audio and image synthesis.
    pub assets: Arc<dyn AssetProvider>,
    /// Media rendering.
    pub composition: Arc<dyn CompositionProvider>,
    /// Remote publishing.
    pub publish: Arc<dyn PublishProvider>,
}

/// Exactly one executor per [`PipelineStage`], in canonical order.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    executors: [Arc<dyn StageExecutor>; 5],
}

impl StageRegistry {
    /// Builds a registry from explicit executors, one per stage in canonical order.
    pub fn new(executors: [Arc<dyn StageExecutor>; 5]) -> Result<Self, ValidationError> {
        for (slot, executor) in PipelineStage::ALL.iter().zip(&executors) {
            if executor.stage() != *slot {
                return Err(ValidationError::new(format!(
                    "executor '{}' registered in the {slot} slot handles {}",
                    executor.name(),
                    executor.stage()
                )));
            }
        }
        Ok(Self { executors })
    }

    /// Builds the standard registry over a set of providers.
    #[must_use]
    pub fn from_providers(providers: Providers) -> Self {
        Self {
            executors: [
                Arc::new(ScriptWriter::new(providers.script)),
                Arc::new(CastingDirector::new(providers.voice)),
                Arc::new(AssetGenerator::new(providers.assets)),
                Arc::new(MediaComposer::new(providers.composition)),
                Arc::new(Publisher::new(providers.publish)),
            ],
        }
    }

    /// The executor for a stage.
    #[must_use]
    pub fn get(&self, stage: PipelineStage) -> &Arc<dyn StageExecutor> {
        &self.executors[stage.index()]
    }

    /// Executors in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StageExecutor>> {
        self.executors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProviders;

    #[test]
    fn test_registry_is_in_canonical_order() {
        let registry = StageRegistry::from_providers(ScriptedProviders::new().providers());
        let stages: Vec<_> = registry.iter().map(|e| e.stage()).collect();
        assert_eq!(stages, PipelineStage::ALL.to_vec());
        assert_eq!(registry.get(PipelineStage::Compose).name(), "compose");
    }

    #[test]
    fn test_registry_rejects_misplaced_executor() {
        let providers = ScriptedProviders::new().providers();
        let script: Arc<dyn StageExecutor> = Arc::new(ScriptWriter::new(providers.script.clone()));
        let casting: Arc<dyn StageExecutor> = Arc::new(CastingDirector::new(providers.voice.clone()));
        let assets: Arc<dyn StageExecutor> = Arc::new(AssetGenerator::new(providers.assets.clone()));
        let compose: Arc<dyn StageExecutor> =
            Arc::new(MediaComposer::new(providers.composition.clone()));
        let publish: Arc<dyn StageExecutor> = Arc::new(Publisher::new(providers.publish));

        assert!(StageRegistry::new([
            script.clone(),
            casting.clone(),
            assets.clone(),
            compose.clone(),
            publish.clone()
        ])
        .is_ok());
        assert!(StageRegistry::new([casting, script, assets, compose, publish]).is_err());
    }
}
