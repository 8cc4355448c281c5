//! Which stages a project runs, and what each one needs.

use crate::core::{PipelineStage, ProjectId, ProjectSettings};
use crate::store::LatestOutputs;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A persisted output a stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredOutput {
    /// A script version.
    Script,
    /// A cast version.
    Cast,
    /// An asset-set version.
    AssetSet,
    /// A composed video inside the latest asset set.
    Video,
}

impl RequiredOutput {
    /// Whether `outputs` provides this dependency.
    #[must_use]
    pub fn is_satisfied(self, outputs: &LatestOutputs) -> bool {
        match self {
            Self::Script => outputs.script.is_some(),
            Self::Cast => outputs.cast.is_some(),
            Self::AssetSet => outputs.assets.is_some(),
            Self::Video => outputs
                .assets
                .as_ref()
                .is_some_and(|a| a.value.video().is_some()),
        }
    }
}

impl fmt::Display for RequiredOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Cast => write!(f, "cast"),
            Self::AssetSet => write!(f, "asset set"),
            Self::Video => write!(f, "composed video"),
        }
    }
}

/// The ordered stages enabled for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<PipelineStage>,
}

impl StagePlan {
    /// The plan implied by a project's settings.
    #[must_use]
    pub fn for_settings(settings: &ProjectSettings) -> Self {
        Self {
            stages: PipelineStage::ALL
                .into_iter()
                .filter(|s| settings.stage_enabled(*s))
                .collect(),
        }
    }

    /// Enabled stages in order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Number of enabled stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if nothing is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether a stage is enabled.
    #[must_use]
    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }

    /// Zero-based position among the enabled stages.
    #[must_use]
    pub fn position(&self, stage: PipelineStage) -> Option<usize> {
        self.stages.iter().position(|s| *s == stage)
    }

    /// Stages from `stage` (inclusive) to the end.
    #[must_use]
    pub fn starting_at(&self, stage: PipelineStage) -> &[PipelineStage] {
        self.position(stage).map_or(&[], |i| &self.stages[i..])
    }

    /// Progress reported when `stage` begins.
    #[must_use]
    pub fn progress_entering(&self, stage: PipelineStage) -> f64 {
        self.fraction(self.position(stage).unwrap_or(0))
    }

    /// Progress reported once `stage` has finished.
    #[must_use]
    pub fn progress_after(&self, stage: PipelineStage) -> f64 {
        self.fraction(self.position(stage).map_or(0, |i| i + 1))
    }

    #[allow(clippy::cast_precision_loss)]
    fn fraction(&self, done: usize) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        (done as f64 / self.stages.len() as f64).clamp(0.0, 1.0)
    }

    /// Outputs that must exist before `stage` can run.
    #[must_use]
    pub fn requirements(&self, stage: PipelineStage) -> Vec<RequiredOutput> {
        match stage {
            PipelineStage::Script => vec![],
            PipelineStage::Casting => vec![RequiredOutput::Script],
            PipelineStage::Assets => vec![RequiredOutput::Script, RequiredOutput::Cast],
            PipelineStage::Compose if self.contains(PipelineStage::Assets) => vec![
                RequiredOutput::Script,
                RequiredOutput::Cast,
                RequiredOutput::AssetSet,
            ],
            PipelineStage::Compose => vec![RequiredOutput::Script, RequiredOutput::Cast],
            PipelineStage::Publish => vec![RequiredOutput::Video],
        }
    }
}

/// A validated request to run a project from some stage to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Target project.
    pub project_id: ProjectId,
    /// Identity of the run.
    pub run_id: Uuid,
    /// First stage to execute.
    pub resume_from: PipelineStage,
    /// The project's enabled stages.
    pub plan: StagePlan,
}

impl RunPlan {
    /// Stages this run will execute, in order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        self.plan.starting_at(self.resume_from)
    }
}
