//! Stage executor trait and implementations.
//!
//! A stage executor turns the latest persisted outputs into the next output.
//! It never writes to the store; the orchestrator persists what it returns.

mod context;
mod executors;
pub mod providers;
mod registry;

pub use context::StageContext;
pub use executors::{
    AssetGenerator, CastingDirector, MediaComposer, Publisher, ScriptWriter, FALLBACK_VOICES,
};
pub use registry::{Providers, StageRegistry};

use crate::core::{AssetSet, Cast, MediaArtifact, PipelineStage, PublishReceipt, Script};
use crate::errors::ExecutionError;
use async_trait::async_trait;
use std::fmt::Debug;

/// What a stage produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// From the script stage.
    Script(Script),
    /// From the casting stage.
    Cast(Cast),
    /// From the asset stage.
    Assets(AssetSet),
    /// From the compose stage.
    Media(MediaArtifact),
    /// From the publish stage.
    Published(PublishReceipt),
}

impl StageOutput {
    /// The stage that produces this kind of output.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        match self {
            Self::Script(_) => PipelineStage::Script,
            Self::Cast(_) => PipelineStage::Casting,
            Self::Assets(_) => PipelineStage::Assets,
            Self::Media(_) => PipelineStage::Compose,
            Self::Published(_) => PipelineStage::Publish,
        }
    }
}

/// Trait for pipeline stage executors.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// The stage this executor implements.
    fn stage(&self) -> PipelineStage;

    /// Returns the name of the executor.
    fn name(&self) -> &str {
        self.stage().as_str()
    }

    /// Executes the stage.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, ExecutionError>;
}
