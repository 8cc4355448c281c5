//! Admission control for pipeline runs.
//!
//! Bounds system-wide concurrent runs and keeps at most one run per project.

use crate::core::ProjectId;
use crate::errors::AdmissionError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

/// What happens to a run request when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail the request with [`AdmissionError::AtCapacity`].
    #[default]
    Reject,
    /// Wait for a slot in arrival order.
    Queue,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "queue" => Ok(Self::Queue),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}

type ActiveSet = Arc<Mutex<HashSet<ProjectId>>>;

/// Releases a project's reservation when dropped.
#[derive(Debug)]
struct ProjectMarker {
    project_id: ProjectId,
    active: ActiveSet,
}

impl Drop for ProjectMarker {
    fn drop(&mut self) {
        self.active.lock().remove(&self.project_id);
        debug!(project_id = %self.project_id, "Released project reservation");
    }
}

/// A project reserved for a run that does not hold a slot yet.
///
/// Dropping it frees the project again.
#[derive(Debug)]
pub struct Reservation {
    marker: ProjectMarker,
}

impl Reservation {
    /// The reserved project.
    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.marker.project_id
    }
}

/// Proof that a run was admitted. Releases the slot and the project on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
    marker: ProjectMarker,
}

impl AdmissionPermit {
    /// The admitted project.
    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.marker.project_id
    }
}

/// Gatekeeper for starting pipeline runs.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    limit: usize,
    policy: BackpressurePolicy,
    active: ActiveSet,
}

impl AdmissionController {
    /// Creates a controller allowing `limit` concurrent runs.
    #[must_use]
    pub fn new(limit: usize, policy: BackpressurePolicy) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            policy,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Maximum concurrent runs.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Configured backpressure policy.
    #[must_use]
    pub const fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Claims the project for a run. Fails immediately if it is already claimed.
    pub fn reserve(&self, project_id: ProjectId) -> Result<Reservation, AdmissionError> {
        if self.semaphore.is_closed() {
            return Err(AdmissionError::Closed);
        }
        if !self.active.lock().insert(project_id) {
            debug!(project_id = %project_id, "Rejected run for busy project");
            return Err(AdmissionError::ProjectBusy(project_id));
        }
        Ok(Reservation {
            marker: ProjectMarker {
                project_id,
                active: self.active.clone(),
            },
        })
    }

    /// Turns a reservation into a permit according to the backpressure policy.
    ///
    /// Under [`BackpressurePolicy::Queue`] this waits in FIFO order; the project
    /// stays reserved while it waits.
    pub async fn admit(&self, reservation: Reservation) -> Result<AdmissionPermit, AdmissionError> {
        match self.policy {
            BackpressurePolicy::Reject => self.try_admit(reservation),
            BackpressurePolicy::Queue => {
                let slot = self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| AdmissionError::Closed)?;
                Ok(self.permit(slot, reservation))
            }
        }
    }

    /// Turns a reservation into a permit only if a slot is free right now.
    pub fn try_admit(&self, reservation: Reservation) -> Result<AdmissionPermit, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(slot) => Ok(self.permit(slot, reservation)),
            Err(TryAcquireError::NoPermits) => {
                info!(
                    project_id = %reservation.project_id(),
                    limit = self.limit,
                    "Run rejected at capacity"
                );
                Err(AdmissionError::AtCapacity { limit: self.limit })
            }
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
        }
    }

    /// Admits a run without waiting.
    pub fn try_acquire(&self, project_id: ProjectId) -> Result<AdmissionPermit, AdmissionError> {
        let reservation = self.reserve(project_id)?;
        self.try_admit(reservation)
    }

    /// Admits a run, applying the backpressure policy.
    pub async fn acquire(&self, project_id: ProjectId) -> Result<AdmissionPermit, AdmissionError> {
        let reservation = self.reserve(project_id)?;
        self.admit(reservation).await
    }

    /// Whether the project is reserved or running.
    #[must_use]
    pub fn is_active(&self, project_id: ProjectId) -> bool {
        self.active.lock().contains(&project_id)
    }

    /// Reserved or running projects.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Free run slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stops admitting runs. Queued requests fail with [`AdmissionError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn permit(&self, slot: OwnedSemaphorePermit, reservation: Reservation) -> AdmissionPermit {
        debug!(
            project_id = %reservation.project_id(),
            available = self.semaphore.available_permits(),
            "Run admitted"
        );
        AdmissionPermit {
            _slot: slot,
            marker: reservation.marker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_one_run_per_project() {
        let controller = AdmissionController::new(3, BackpressurePolicy::Reject);
        let id = ProjectId::new();

        let permit = controller.try_acquire(id).unwrap();
        assert_eq!(controller.try_acquire(id).unwrap_err(), AdmissionError::ProjectBusy(id));

        drop(permit);
        assert!(controller.try_acquire(id).is_ok());
    }

    #[test]
    fn test_reject_policy_at_capacity() {
        let controller = AdmissionController::new(1, BackpressurePolicy::Reject);
        let _held = controller.try_acquire(ProjectId::new()).unwrap();

        let other = ProjectId::new();
        assert_eq!(
            controller.try_acquire(other).unwrap_err(),
            AdmissionError::AtCapacity { limit: 1 }
        );
        // a rejected request does not keep the project reserved
        assert!(!controller.is_active(other));
    }

    #[test]
    fn test_reject_policy_applies_to_acquire() {
        let controller = AdmissionController::new(1, BackpressurePolicy::Reject);
        let _held = controller.try_acquire(ProjectId::new()).unwrap();

        let mut fut = task::spawn(controller.acquire(ProjectId::new()));
        let result = assert_ready!(fut.poll());
        assert_eq!(result.unwrap_err(), AdmissionError::AtCapacity { limit: 1 });
    }

    #[test]
    fn test_queue_policy_waits_for_slot() {
        let controller = AdmissionController::new(1, BackpressurePolicy::Queue);
        let held = controller.try_acquire(ProjectId::new()).unwrap();

        let queued_id = ProjectId::new();
        let mut fut = task::spawn(controller.acquire(queued_id));
        assert_pending!(fut.poll());
        assert!(controller.is_active(queued_id));

        drop(held);
        assert!(fut.is_woken());
        let permit = assert_ready!(fut.poll()).unwrap();
        assert_eq!(permit.project_id(), queued_id);
    }

    #[test]
    fn test_queue_is_fifo() {
        let controller = AdmissionController::new(1, BackpressurePolicy::Queue);
        let held = controller.try_acquire(ProjectId::new()).unwrap();

        let mut first = task::spawn(controller.acquire(ProjectId::new()));
        let mut second = task::spawn(controller.acquire(ProjectId::new()));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        drop(held);
        assert_pending!(second.poll());
        let permit = assert_ready!(first.poll()).unwrap();

        drop(permit);
        assert!(assert_ready!(second.poll()).is_ok());
    }

    #[test]
    fn test_dropping_queued_request_releases_project() {
        let controller = AdmissionController::new(1, BackpressurePolicy::Queue);
        let _held = controller.try_acquire(ProjectId::new()).unwrap();

        let id = ProjectId::new();
        let mut fut = task::spawn(controller.acquire(id));
        assert_pending!(fut.poll());
        drop(fut);
        assert!(!controller.is_active(id));
    }

    #[test]
    fn test_close_rejects_new_requests() {
        let controller = AdmissionController::new(2, BackpressurePolicy::Queue);
        controller.close();
        assert_eq!(
            controller.try_acquire(ProjectId::new()).unwrap_err(),
            AdmissionError::Closed
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Queue".parse::<BackpressurePolicy>(), Ok(BackpressurePolicy::Queue));
        assert_eq!("reject".parse::<BackpressurePolicy>(), Ok(BackpressurePolicy::Reject));
        assert!("drop".parse::<BackpressurePolicy>().is_err());
    }
}
