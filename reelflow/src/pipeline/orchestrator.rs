//! Drives a project through its stages.
//!
//! The orchestrator is the only writer of project state. Every status change
//! is persisted before it is broadcast, so an observer that resynchronizes
//! from the store is never behind what it was told.

use super::plan::{RunPlan, StagePlan};
use super::retry::{with_retry_if, RetryConfig};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::core::{
    Asset, PipelineStage, ProgressEvent, Project, ProjectId, ProjectStatus, PublishReceipt,
    Transition,
};
use crate::errors::{ExecutionError, ReelflowError, StoreError, ValidationError};
use crate::events::ProgressBroadcaster;
use crate::observability::StageTimer;
use crate::stages::{StageContext, StageExecutor, StageOutput, StageRegistry};
use crate::store::{LatestOutputs, ProjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// The project that ran.
    pub project_id: ProjectId,
    /// Identity of the run.
    pub run_id: Uuid,
    /// Status persisted when the run stopped.
    pub status: ProjectStatus,
    /// Stages whose executor was invoked, in order.
    pub stages_executed: Vec<PipelineStage>,
    /// Failure description when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    /// True if the run reached `completed` or `published`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ProjectStatus::Completed | ProjectStatus::Published
        )
    }
}

/// What the stage loop decided after a stage.
enum StageResult {
    Continue,
    Stop,
}

/// Mutable state of one run.
struct RunState {
    project: Project,
    run_id: Uuid,
    progress: f64,
    executed: Vec<PipelineStage>,
    error: Option<String>,
}

impl RunState {
    fn outcome(self) -> RunOutcome {
        RunOutcome {
            project_id: self.project.id,
            run_id: self.run_id,
            status: self.project.status,
            stages_executed: self.executed,
            error: self.error,
        }
    }
}

/// Sequences stage executors over the project state machine.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    store: Arc<dyn ProjectStore>,
    registry: StageRegistry,
    broadcaster: Arc<ProgressBroadcaster>,
    cancellation: Arc<CancellationController>,
    retry: RetryConfig,
    stage_timeout: Option<Duration>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default retry policy and no stage timeout.
    #[must_use]
    pub fn new(
        store: Arc<dyn ProjectStore>,
        registry: StageRegistry,
        broadcaster: Arc<ProgressBroadcaster>,
        cancellation: Arc<CancellationController>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            cancellation,
            retry: RetryConfig::default(),
            stage_timeout: None,
        }
    }

    /// Sets the retry policy for transient stage errors.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt stage timeout. A timeout counts as a transient error.
    #[must_use]
    pub const fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// The project store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// Checks a run request without mutating anything.
    ///
    /// `resume_from = None` starts at the first stage.
    pub async fn plan_run(
        &self,
        project_id: ProjectId,
        resume_from: Option<PipelineStage>,
    ) -> Result<RunPlan, ReelflowError> {
        let project = match self.store.get_project(project_id).await {
            Ok(project) => project,
            Err(StoreError::NotFound(_)) => {
                return Err(ValidationError::new(format!("project {project_id} not found"))
                    .with_project(project_id)
                    .into());
            }
            Err(e) => return Err(e.into()),
        };

        if project.status.is_active() {
            return Err(ValidationError::new(format!(
                "project is already running ({})",
                project.status
            ))
            .with_project(project_id)
            .into());
        }

        let plan = StagePlan::for_settings(&project.settings);
        let stage = resume_from
            .or_else(|| plan.stages().first().copied())
            .unwrap_or(PipelineStage::Script);
        if !plan.contains(stage) {
            return Err(ValidationError::new(format!(
                "stage {stage} is not part of this project's pipeline"
            ))
            .with_project(project_id)
            .into());
        }

        let outputs = self.store.latest_outputs(project_id).await?;
        let missing: Vec<String> = plan
            .requirements(stage)
            .into_iter()
            .filter(|r| !r.is_satisfied(&outputs))
            .map(|r| r.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::new(format!(
                "cannot start at {stage}: missing {}",
                missing.join(", ")
            ))
            .with_project(project_id)
            .into());
        }

        Ok(RunPlan {
            project_id,
            run_id: Uuid::now_v7(),
            resume_from: stage,
            plan,
        })
    }

    /// Validates and executes a run.
    pub async fn run(
        &self,
        project_id: ProjectId,
        resume_from: Option<PipelineStage>,
    ) -> Result<RunOutcome, ReelflowError> {
        let plan = self.plan_run(project_id, resume_from).await?;
        self.execute(plan).await
    }

    /// Executes a validated run plan.
    ///
    /// Uses the cancellation token registered for the project, registering
    /// (and afterwards clearing) one if there is none.
    pub async fn execute(&self, plan: RunPlan) -> Result<RunOutcome, ReelflowError> {
        let project_id = plan.project_id;
        let (token, owned) = match self.cancellation.token(project_id) {
            Some(token) => (token, false),
            None => (self.cancellation.register(project_id), true),
        };

        let span = info_span!(
            "pipeline_run",
            project_id = %project_id,
            run_id = %plan.run_id,
            resume_from = %plan.resume_from,
        );
        let result = self.execute_inner(plan, &token).instrument(span).await;

        if owned {
            self.cancellation.clear(project_id, &token);
        }
        result
    }

    async fn execute_inner(
        &self,
        plan: RunPlan,
        token: &Arc<CancellationToken>,
    ) -> Result<RunOutcome, ReelflowError> {
        let project = self.store.get_project(plan.project_id).await?;
        info!(status = %project.status, stages = plan.stages().len(), "Pipeline run started");

        let mut state = RunState {
            project,
            run_id: plan.run_id,
            progress: plan.plan.progress_entering(plan.resume_from),
            executed: Vec::new(),
            error: None,
        };

        for (i, &stage) in plan.stages().iter().enumerate() {
            if token.is_cancelled() {
                self.cancel(&mut state).await?;
                break;
            }

            let entry = if i == 0 {
                Transition::Enter(stage)
            } else {
                Transition::Advance(stage.active_status())
            };
            let progress = plan.plan.progress_entering(stage);
            if let Err(e) = self.transition(&mut state, entry, progress, None).await {
                self.fail_on(&mut state, e).await?;
                break;
            }
            info!(stage = %stage, progress, "Stage started");

            match self.run_stage(&mut state, &plan.plan, stage, token).await? {
                StageResult::Continue => {}
                StageResult::Stop => break,
            }
        }

        info!(status = %state.project.status, "Pipeline run finished");
        Ok(state.outcome())
    }

    async fn run_stage(
        &self,
        state: &mut RunState,
        plan: &StagePlan,
        stage: PipelineStage,
        token: &Arc<CancellationToken>,
    ) -> Result<StageResult, ReelflowError> {
        let project_id = state.project.id;

        let outputs = match self.store.latest_outputs(project_id).await {
            Ok(outputs) => outputs,
            Err(e) => return self.fail_on(state, e.into()).await,
        };
        let ctx = StageContext::new(
            project_id,
            state.run_id,
            stage,
            state.project.settings.clone(),
            outputs,
            token.clone(),
        );

        let executor = self.registry.get(stage);
        state.executed.push(stage);
        let timer = StageTimer::start(stage);
        let result = self.invoke(executor.as_ref(), &ctx).await;
        timer.finish(result.is_ok());

        let output = match result {
            Ok(output) if output.stage() == stage => output,
            Ok(output) => {
                let err = ExecutionError::fatal(
                    stage,
                    format!("executor returned output of the {} stage", output.stage()),
                );
                return self.fail_with(state, err.to_string()).await;
            }
            Err(e) if e.is_cancelled() || (e.is_transient() && token.is_cancelled()) => {
                debug!(stage = %stage, "Executor stopped on cancellation");
                self.cancel(state).await?;
                return Ok(StageResult::Stop);
            }
            Err(e) => return self.fail_with(state, e.into_fatal().to_string()).await,
        };

        let persisted = match self.persist_output(project_id, &ctx.outputs, output).await {
            Ok(persisted) => persisted,
            Err(e) => return self.fail_on(state, e.into()).await,
        };

        // a cancellation that arrived while the stage ran keeps its output;
        // a finished upload is live remotely and is always recorded
        let published = matches!(persisted, Persisted::Receipt(_));
        if token.is_cancelled() && !published {
            self.cancel(state).await?;
            return Ok(StageResult::Stop);
        }

        let (transition, event) = match persisted {
            Persisted::Output => return Ok(StageResult::Continue),
            Persisted::Media(locator) => (
                Transition::Advance(ProjectStatus::Completed),
                ProgressEvent::completed(locator),
            ),
            Persisted::Receipt(receipt) => {
                let url = receipt.remote_url.clone();
                (Transition::Publish(receipt), ProgressEvent::published(url))
            }
        };

        let progress = plan.progress_after(stage);
        if let Err(e) = self.transition(state, transition, progress, Some(event)).await {
            return self.fail_on(state, e).await;
        }
        Ok(StageResult::Continue)
    }

    async fn invoke(
        &self,
        executor: &dyn StageExecutor,
        ctx: &StageContext,
    ) -> Result<StageOutput, ExecutionError> {
        let stage = ctx.stage;
        let timeout = self.stage_timeout;
        with_retry_if(
            &self.retry,
            move |attempt| async move {
                debug!(stage = %stage, attempt, executor = executor.name(), "Invoking stage executor");
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, executor.execute(ctx))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ExecutionError::transient(
                                stage,
                                format!("timed out after {}ms", limit.as_millis()),
                            ))
                        }),
                    None => executor.execute(ctx).await,
                }
            },
            |e: &ExecutionError| e.is_transient() && !ctx.is_cancelled(),
        )
        .await
    }

    async fn persist_output(
        &self,
        project_id: ProjectId,
        previous: &LatestOutputs,
        output: StageOutput,
    ) -> Result<Persisted, StoreError> {
        match output {
            StageOutput::Script(script) => {
                let version = self.store.append_script(project_id, script).await?;
                debug!(version, "Persisted script");
            }
            StageOutput::Cast(cast) => {
                let version = self.store.append_cast(project_id, cast).await?;
                debug!(version, "Persisted cast");
            }
            StageOutput::Assets(assets) => {
                let version = self.store.append_asset_set(project_id, assets).await?;
                debug!(version, "Persisted asset set");
            }
            StageOutput::Media(media) => {
                let base = previous
                    .assets
                    .as_ref()
                    .map(|v| v.value.clone())
                    .unwrap_or_default();
                let assets = base.with_video(Asset::video(media.locator.clone()));
                let version = self.store.append_asset_set(project_id, assets).await?;
                debug!(version, locator = %media.locator, "Persisted composed media");
                return Ok(Persisted::Media(media.locator));
            }
            StageOutput::Published(receipt) => return Ok(Persisted::Receipt(receipt)),
        }
        Ok(Persisted::Output)
    }

    /// Applies, persists, then broadcasts a transition.
    async fn transition(
        &self,
        state: &mut RunState,
        transition: Transition,
        progress: f64,
        follow_up: Option<ProgressEvent>,
    ) -> Result<(), ReelflowError> {
        let mut next = state.project.clone();
        next.apply(transition)?;
        self.store.update_project(&next).await?;
        state.project = next;

        let progress = progress.max(state.progress);
        state.progress = progress;
        self.broadcaster.publish(
            state.project.id,
            ProgressEvent::status_change(state.project.status, progress),
        );
        if let Some(event) = follow_up {
            self.broadcaster.publish(state.project.id, event);
        }
        Ok(())
    }

    /// Persists and broadcasts `cancelled`.
    ///
    /// A run cancelled before its first stage began leaves the project at
    /// whatever resting status it had.
    async fn cancel(&self, state: &mut RunState) -> Result<(), ReelflowError> {
        if state.executed.is_empty() && state.project.status.is_resting() {
            info!(status = %state.project.status, "Run cancelled before it began");
            return Ok(());
        }
        info!(status = %state.project.status, "Run cancelled");
        let progress = state.progress;
        self.transition(state, Transition::Cancel, progress, None)
            .await
            .map_err(|e| {
                error!(error = %e, "Could not persist cancellation");
                e
            })
    }

    /// Ends the run as failed after an infrastructure or state-machine error.
    async fn fail_on(
        &self,
        state: &mut RunState,
        err: ReelflowError,
    ) -> Result<StageResult, ReelflowError> {
        warn!(error = %err, "Run interrupted");
        self.fail_with(state, err.to_string()).await
    }

    /// Persists `failed`, then broadcasts it followed by an `error` event.
    async fn fail_with(
        &self,
        state: &mut RunState,
        message: String,
    ) -> Result<StageResult, ReelflowError> {
        warn!(status = %state.project.status, error = %message, "Run failed");

        let mut next = state.project.clone();
        next.apply(Transition::Fail(message.clone()))?;
        if let Err(e) = self.store.update_project(&next).await {
            error!(error = %e, "Could not persist failure, nothing broadcast");
            return Err(e.into());
        }
        state.project = next;
        state.error = Some(message.clone());

        let id = state.project.id;
        self.broadcaster
            .publish(id, ProgressEvent::status_change(ProjectStatus::Failed, state.progress));
        self.broadcaster.publish(id, ProgressEvent::error(message));
        Ok(StageResult::Stop)
    }
}

/// What persisting a stage output produced.
enum Persisted {
    Output,
    Media(String),
    Receipt(PublishReceipt),
}
