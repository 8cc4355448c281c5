//! Per-project cancellation registry.

use super::token::CancellationToken;
use crate::core::ProjectId;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Reason recorded on tokens cancelled through the controller.
pub const CANCEL_REQUESTED: &str = "cancellation requested";

/// Tracks the cancellation token of each project's active run.
///
/// A run registers a fresh token when it starts and clears it when it ends,
/// so a request aimed at an earlier run never leaks into a later one.
#[derive(Debug, Default)]
pub struct CancellationController {
    tokens: DashMap<ProjectId, Arc<CancellationToken>>,
}

impl CancellationController {
    /// Creates an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for a new run, replacing any stale one.
    pub fn register(&self, project_id: ProjectId) -> Arc<CancellationToken> {
        let token = Arc::new(CancellationToken::new());
        self.tokens.insert(project_id, token.clone());
        debug!(project_id = %project_id, "Registered cancellation token");
        token
    }

    /// Flags the project's active run for cancellation.
    ///
    /// Returns `false` when the project has no registered run.
    pub fn request_cancel(&self, project_id: ProjectId) -> bool {
        let Some(token) = self.token(project_id) else {
            return false;
        };
        if token.cancel(CANCEL_REQUESTED) {
            info!(project_id = %project_id, "Cancellation requested");
        }
        true
    }

    /// Whether the project's active run has been asked to stop.
    #[must_use]
    pub fn is_cancel_requested(&self, project_id: ProjectId) -> bool {
        self.tokens
            .get(&project_id)
            .is_some_and(|t| t.is_cancelled())
    }

    /// The token of the project's active run.
    #[must_use]
    pub fn token(&self, project_id: ProjectId) -> Option<Arc<CancellationToken>> {
        self.tokens.get(&project_id).map(|t| t.value().clone())
    }

    /// Removes `token` if it is still the one registered for the project.
    pub fn clear(&self, project_id: ProjectId, token: &Arc<CancellationToken>) {
        self.tokens
            .remove_if(&project_id, |_, current| Arc::ptr_eq(current, token));
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when no run is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
