//! Fixtures for pipeline tests.

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::core::{NewProject, Project, ProjectSettings, Scene, Script};
use crate::errors::ReelflowError;
use crate::pipeline::RetryConfig;
use crate::service::PipelineService;
use crate::store::InMemoryProjectStore;

use super::mocks::ScriptedProviders;

/// Three scenes shared by two speakers, `Host` and `Expert`.
#[must_use]
pub fn sample_script() -> Script {
    Script::new(vec![
        Scene::new("Host", "Welcome to the show.").with_duration(2.5),
        Scene::new("Expert", "Thanks for having me.").with_duration(3.0),
        Scene::new("Host", "Let's get started.").with_duration(2.0),
    ])
}

/// A service over an in-memory store and scripted providers.
///
/// Retries happen immediately so failure tests do not sleep.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The store, concrete so tests can simulate outages.
    pub store: Arc<InMemoryProjectStore>,
    /// The providers behind every stage.
    pub providers: ScriptedProviders,
    /// The service under test.
    pub service: PipelineService,
}

impl TestHarness {
    /// Default configuration and succeeding providers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_providers(ScriptedProviders::new())
    }

    /// Default configuration with the given providers.
    #[must_use]
    pub fn with_providers(providers: ScriptedProviders) -> Self {
        Self::build(providers, Self::default_config())
    }

    /// The given configuration with succeeding providers.
    #[must_use]
    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(ScriptedProviders::new(), config)
    }

    /// Configuration used by [`TestHarness::new`].
    #[must_use]
    pub fn default_config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_retry(RetryConfig::immediate(3))
    }

    /// Builds a harness. Invalid configurations fall back to the defaults.
    #[must_use]
    pub fn build(providers: ScriptedProviders, config: OrchestratorConfig) -> Self {
        let config = if config.validate().is_ok() {
            config
        } else {
            Self::default_config()
        };
        let store = Arc::new(InMemoryProjectStore::new());
        let service = match PipelineService::new(store.clone(), providers.providers(), &config) {
            Ok(service) => service,
            Err(e) => unreachable!("validated configuration was rejected: {e}"),
        };
        Self {
            store,
            providers,
            service,
        }
    }

    /// Creates a project with `settings`.
    pub async fn create(&self, settings: ProjectSettings) -> Result<Project, ReelflowError> {
        self.service
            .create_project(NewProject::new("Test project", settings))
            .await
    }

    /// Creates a project with default settings for `prompt`.
    pub async fn create_default(&self, prompt: &str) -> Result<Project, ReelflowError> {
        self.create(ProjectSettings::new(prompt)).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
