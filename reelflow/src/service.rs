//! The service facade callers use to drive projects.
//!
//! Wires the store, orchestrator, admission, cancellation and progress
//! broadcasting together. Runs execute on spawned tokio tasks; callers get a
//! [`RunHandle`] back as soon as the run is admitted or queued.

use crate::admission::{AdmissionController, AdmissionPermit, BackpressurePolicy, Reservation};
use crate::cancellation::CancellationController;
use crate::config::OrchestratorConfig;
use crate::core::{NewProject, PipelineStage, ProgressEvent, Project, ProjectId, Transition};
use crate::errors::{ReelflowError, StoreError, ValidationError};
use crate::events::{ProgressBroadcaster, ProgressSubscription};
use crate::pipeline::{Orchestrator, RunOutcome};
use crate::stages::{Providers, StageRegistry};
use crate::store::{FileProjectStore, InMemoryProjectStore, LatestOutputs, OutputHistory, ProjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error message recorded on projects found mid-run at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// A project together with its latest outputs.
///
/// This is the read observers use to resynchronize after missing events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    /// Current project state.
    pub project: Project,
    /// Latest version of each output.
    pub outputs: LatestOutputs,
}

/// A spawned run.
#[derive(Debug)]
pub struct RunHandle {
    project_id: ProjectId,
    run_id: Uuid,
    join: JoinHandle<Result<RunOutcome, ReelflowError>>,
}

impl RunHandle {
    /// The project being run.
    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Identity of the run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the run task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run to end.
    pub async fn wait(self) -> Result<RunOutcome, ReelflowError> {
        self.join
            .await
            .map_err(|e| ReelflowError::Internal(format!("run task failed: {e}")))?
    }
}

/// How a run got its slot.
enum Slot {
    Admitted(AdmissionPermit),
    Queued(Reservation),
}

/// Entry point for creating, running, cancelling and observing projects.
#[derive(Debug, Clone)]
pub struct PipelineService {
    store: Arc<dyn ProjectStore>,
    orchestrator: Orchestrator,
    admission: AdmissionController,
    cancellation: Arc<CancellationController>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl PipelineService {
    /// Builds a service over `store` with the built-in executors.
    pub fn new(
        store: Arc<dyn ProjectStore>,
        providers: Providers,
        config: &OrchestratorConfig,
    ) -> Result<Self, ReelflowError> {
        Self::with_registry(store, StageRegistry::from_providers(providers), config)
    }

    /// Builds a service over `store` with custom executors.
    pub fn with_registry(
        store: Arc<dyn ProjectStore>,
        registry: StageRegistry,
        config: &OrchestratorConfig,
    ) -> Result<Self, ReelflowError> {
        config.validate()?;
        let broadcaster = Arc::new(ProgressBroadcaster::new(config.broadcast_capacity));
        let cancellation = Arc::new(CancellationController::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            registry,
            broadcaster.clone(),
            cancellation.clone(),
        )
        .with_retry(config.retry.clone())
        .with_stage_timeout(config.stage_timeout());

        info!(
            max_concurrent_runs = config.max_concurrent_runs,
            backpressure = %config.backpressure,
            "Pipeline service ready"
        );
        Ok(Self {
            store,
            orchestrator,
            admission: AdmissionController::new(config.max_concurrent_runs, config.backpressure),
            cancellation,
            broadcaster,
        })
    }

    /// Builds a service with the store `config` asks for: a file store under
    /// `state_dir`, or memory when it is unset.
    pub async fn from_config(
        config: &OrchestratorConfig,
        providers: Providers,
    ) -> Result<Self, ReelflowError> {
        let store: Arc<dyn ProjectStore> = match &config.state_dir {
            Some(dir) => Arc::new(FileProjectStore::open(dir.clone()).await?),
            None => Arc::new(InMemoryProjectStore::new()),
        };
        Self::new(store, providers, config)
    }

    /// The project store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// The orchestrator runs execute on.
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Admission control.
    #[must_use]
    pub const fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Cancellation registry.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationController> {
        &self.cancellation
    }

    /// Progress broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Validates and stores a new `draft` project.
    pub async fn create_project(&self, new: NewProject) -> Result<Project, ReelflowError> {
        if new.title.trim().is_empty() {
            return Err(ValidationError::new("project title must not be empty").into());
        }
        new.settings.validate()?;

        let project = Project::new(new);
        self.store.insert_project(&project).await?;
        info!(project_id = %project.id, title = %project.title, "Project created");
        Ok(project)
    }

    /// Reads a project.
    pub async fn get_project(&self, project_id: ProjectId) -> Result<Project, ReelflowError> {
        self.store
            .get_project(project_id)
            .await
            .map_err(|e| not_found_as_validation(e, project_id))
    }

    /// All projects, oldest first.
    pub async fn list_projects(&self) -> Result<Vec<Project>, ReelflowError> {
        Ok(self.store.list_projects().await?)
    }

    /// Runs every enabled stage from the first.
    pub async fn start(&self, project_id: ProjectId) -> Result<RunHandle, ReelflowError> {
        self.launch(project_id, None).await
    }

    /// Re-runs the pipeline from `stage`, reusing the earlier stages' latest outputs.
    pub async fn regenerate(
        &self,
        project_id: ProjectId,
        stage: PipelineStage,
    ) -> Result<RunHandle, ReelflowError> {
        self.launch(project_id, Some(stage)).await
    }

    async fn launch(
        &self,
        project_id: ProjectId,
        resume_from: Option<PipelineStage>,
    ) -> Result<RunHandle, ReelflowError> {
        let plan = self.orchestrator.plan_run(project_id, resume_from).await?;
        let reservation = self.admission.reserve(project_id)?;
        let slot = match self.admission.policy() {
            BackpressurePolicy::Reject => Slot::Admitted(self.admission.try_admit(reservation)?),
            BackpressurePolicy::Queue => Slot::Queued(reservation),
        };

        let token = self.cancellation.register(project_id);
        let run_id = plan.run_id;
        let orchestrator = self.orchestrator.clone();
        let admission = self.admission.clone();
        let cancellation = self.cancellation.clone();

        let join = tokio::spawn(async move {
            let _permit = match slot {
                Slot::Admitted(permit) => permit,
                Slot::Queued(reservation) => {
                    debug!(project_id = %project_id, "Run queued for a slot");
                    match admission.admit(reservation).await {
                        Ok(permit) => permit,
                        Err(e) => {
                            cancellation.clear(project_id, &token);
                            return Err(e.into());
                        }
                    }
                }
            };
            let result = orchestrator.execute(plan).await;
            cancellation.clear(project_id, &token);
            result
        });

        Ok(RunHandle {
            project_id,
            run_id,
            join,
        })
    }

    /// Asks the project's active or queued run to stop.
    ///
    /// Returns `false` when the project has no run in flight.
    pub async fn cancel(&self, project_id: ProjectId) -> Result<bool, ReelflowError> {
        if self.cancellation.request_cancel(project_id) {
            return Ok(true);
        }
        self.get_project(project_id).await?;
        debug!(project_id = %project_id, "Nothing to cancel");
        Ok(false)
    }

    /// Subscribes to the project's live progress events.
    ///
    /// Events published before this call are not replayed; use
    /// [`snapshot`](Self::snapshot) for the current state.
    #[must_use]
    pub fn subscribe(&self, project_id: ProjectId) -> ProgressSubscription {
        self.broadcaster.subscribe(project_id)
    }

    /// The project with its latest outputs.
    pub async fn snapshot(&self, project_id: ProjectId) -> Result<ProjectSnapshot, ReelflowError> {
        let project = self.get_project(project_id).await?;
        let outputs = self.store.latest_outputs(project_id).await?;
        Ok(ProjectSnapshot { project, outputs })
    }

    /// Every stored version of the project's outputs.
    pub async fn history(&self, project_id: ProjectId) -> Result<OutputHistory, ReelflowError> {
        self.store
            .history(project_id)
            .await
            .map_err(|e| not_found_as_validation(e, project_id))
    }

    /// Marks projects stuck in an active status with no run behind them as
    /// `failed`. Meant for startup, after a crash left runs half done.
    ///
    /// Returns the recovered projects.
    pub async fn recover_interrupted(&self) -> Result<Vec<ProjectId>, ReelflowError> {
        let mut recovered = Vec::new();
        for mut project in self.store.list_projects().await? {
            if !project.status.is_active() || self.admission.is_active(project.id) {
                continue;
            }
            let from = project.status;
            project.apply(Transition::Fail(INTERRUPTED_MESSAGE.to_string()))?;
            self.store.update_project(&project).await?;
            warn!(project_id = %project.id, status = %from, "Recovered interrupted run");

            self.broadcaster.publish(
                project.id,
                ProgressEvent::status_change(project.status, 0.0),
            );
            self.broadcaster
                .publish(project.id, ProgressEvent::error(INTERRUPTED_MESSAGE));
            recovered.push(project.id);
        }
        Ok(recovered)
    }

    /// Stops admitting runs. Runs already admitted finish normally.
    pub fn shutdown(&self) {
        info!(active = self.admission.active_count(), "Pipeline service shutting down");
        self.admission.close();
    }
}

fn not_found_as_validation(err: StoreError, project_id: ProjectId) -> ReelflowError {
    match err {
        StoreError::NotFound(_) => ValidationError::new(format!("project {project_id} not found"))
            .with_project(project_id)
            .into(),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProjectSettings, ProjectStatus};
    use crate::pipeline::RetryConfig;
    use crate::testing::ScriptedProviders;

    fn service() -> PipelineService {
        let config = OrchestratorConfig::default().with_retry(RetryConfig::immediate(2));
        PipelineService::new(
            Arc::new(InMemoryProjectStore::new()),
            ScriptedProviders::new().providers(),
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_project_validates_settings() {
        let service = service();
        let err = service
            .create_project(NewProject::new("t", ProjectSettings::new("  ")))
            .await
            .unwrap_err();
        assert!(matches!(err, ReelflowError::Validation(_)));
        assert!(service.list_projects().await.unwrap().is_empty());

        let project = service
            .create_project(NewProject::new("t", ProjectSettings::new("a prompt")))
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Draft);
    }

    #[tokio::test]
    async fn test_cancel_without_run_is_noop() {
        let service = service();
        let project = service
            .create_project(NewProject::new("t", ProjectSettings::new("p")))
            .await
            .unwrap();
        assert!(!service.cancel(project.id).await.unwrap());

        let err = service.cancel(ProjectId::new()).await.unwrap_err();
        assert!(matches!(err, ReelflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_unknown_project_is_rejected() {
        let err = service().start(ProjectId::new()).await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_snapshot_of_finished_run() {
        let service = service();
        let project = service
            .create_project(NewProject::new("t", ProjectSettings::new("p")))
            .await
            .unwrap();
        let outcome = service.start(project.id).await.unwrap().wait().await.unwrap();
        assert_eq!(outcome.status, ProjectStatus::Completed);

        let snapshot = service.snapshot(project.id).await.unwrap();
        assert_eq!(snapshot.project.status, ProjectStatus::Completed);
        assert!(snapshot.outputs.script.is_some());
        assert!(service.cancellation().is_empty());
        assert_eq!(service.admission().active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_runs() {
        let service = service();
        let project = service
            .create_project(NewProject::new("t", ProjectSettings::new("p")))
            .await
            .unwrap();
        service.shutdown();
        let err = service.start(project.id).await.unwrap_err();
        assert!(matches!(err, ReelflowError::Admission(_)));
    }
}
