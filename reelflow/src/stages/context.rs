//! Read-only inputs handed to a stage executor.

use crate::cancellation::CancellationToken;
use crate::core::{AssetSet, Cast, PipelineStage, ProjectId, ProjectSettings, Script};
use crate::errors::ExecutionError;
use crate::store::LatestOutputs;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage may read: project settings and the latest outputs
/// of the stages before it.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Project being processed.
    pub project_id: ProjectId,
    /// Identity of the current run.
    pub run_id: Uuid,
    /// Stage being executed.
    pub stage: PipelineStage,
    /// Project settings.
    pub settings: ProjectSettings,
    /// Latest persisted outputs.
    pub outputs: LatestOutputs,
    cancellation: Arc<CancellationToken>,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        run_id: Uuid,
        stage: PipelineStage,
        settings: ProjectSettings,
        outputs: LatestOutputs,
        cancellation: Arc<CancellationToken>,
    ) -> Self {
        Self {
            project_id,
            run_id,
            stage,
            settings,
            outputs,
            cancellation,
        }
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the run has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Latest script, or a fatal error naming the current stage.
    pub fn require_script(&self) -> Result<&Script, ExecutionError> {
        self.outputs
            .script
            .as_ref()
            .map(|v| &v.value)
            .ok_or_else(|| self.missing("script"))
    }

    /// Latest cast, or a fatal error naming the current stage.
    pub fn require_cast(&self) -> Result<&Cast, ExecutionError> {
        self.outputs
            .cast
            .as_ref()
            .map(|v| &v.value)
            .ok_or_else(|| self.missing("cast"))
    }

    /// Latest asset set, or a fatal error naming the current stage.
    pub fn require_assets(&self) -> Result<&AssetSet, ExecutionError> {
        self.assets().ok_or_else(|| self.missing("asset set"))
    }

    /// Latest asset set, if any.
    #[must_use]
    pub fn assets(&self) -> Option<&AssetSet> {
        self.outputs.assets.as_ref().map(|v| &v.value)
    }

    /// Runs `work` unless the run is cancelled first.
    pub async fn cancellable<T, F>(&self, work: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, ExecutionError>> + Send,
    {
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(ExecutionError::cancelled(self.stage)),
            result = work => result,
        }
    }

    fn missing(&self, what: &str) -> ExecutionError {
        ExecutionError::fatal(self.stage, format!("no {what} available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Scene, Versioned};

    fn ctx(outputs: LatestOutputs) -> StageContext {
        StageContext::new(
            ProjectId::new(),
            Uuid::now_v7(),
            PipelineStage::Casting,
            ProjectSettings::new("prompt"),
            outputs,
            Arc::new(CancellationToken::new()),
        )
    }

    #[test]
    fn test_require_missing_output_is_fatal() {
        let ctx = ctx(LatestOutputs::default());
        let err = ctx.require_script().unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.stage(), PipelineStage::Casting);
    }

    #[test]
    fn test_require_present_output() {
        let outputs = LatestOutputs {
            script: Some(Versioned::new(1, Script::new(vec![Scene::new("A", "x")]))),
            ..LatestOutputs::default()
        };
        let ctx = ctx(outputs);
        assert_eq!(ctx.require_script().unwrap().scenes.len(), 1);
        assert!(ctx.assets().is_none());
    }

    #[tokio::test]
    async fn test_cancellable_aborts_on_cancel() {
        let ctx = ctx(LatestOutputs::default());
        ctx.cancellation().cancel("stop");

        let result: Result<(), _> = ctx
            .cancellable(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let ctx = ctx(LatestOutputs::default());
        let result = ctx.cancellable(async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
