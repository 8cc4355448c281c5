//! Per-project progress fan-out.

use crate::core::{ProgressEvent, ProjectId};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default number of buffered events per project channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Why a subscription could not yield an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `missed` events were dropped for it.
    /// It should resynchronize by reading the project state.
    #[error("subscriber lagged behind by {missed} events")]
    Lagged {
        /// Number of dropped events.
        missed: u64,
    },

    /// The project channel was closed.
    #[error("progress channel closed")]
    Closed,
}

/// A live feed of one project's progress events.
///
/// Only events published after subscribing are delivered; there is no replay.
#[derive(Debug)]
pub struct ProgressSubscription {
    project_id: ProjectId,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// The project being observed.
    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Result<ProgressEvent, SubscriptionError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(missed) => SubscriptionError::Lagged { missed },
            broadcast::error::RecvError::Closed => SubscriptionError::Closed,
        })
    }

    /// Returns the next buffered event without waiting, `Ok(None)` if there is none.
    pub fn try_recv(&mut self) -> Result<Option<ProgressEvent>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Err(SubscriptionError::Lagged { missed })
            }
            Err(broadcast::error::TryRecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Result<Vec<ProgressEvent>, SubscriptionError> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv()? {
            events.push(event);
        }
        Ok(events)
    }
}

/// Fans progress events out to every live subscriber of a project.
#[derive(Debug)]
pub struct ProgressBroadcaster {
    channels: DashMap<ProjectId, broadcast::Sender<ProgressEvent>>,
    capacity: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl ProgressBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Per-subscriber buffer size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribes to a project's future events.
    pub fn subscribe(&self, project_id: ProjectId) -> ProgressSubscription {
        let receiver = self
            .channels
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(project_id = %project_id, "Progress subscriber attached");
        ProgressSubscription {
            project_id,
            receiver,
        }
    }

    /// Publishes an event and returns how many subscribers it reached.
    ///
    /// A project with no subscribers drops the event and loses its channel.
    pub fn publish(&self, project_id: ProjectId, event: ProgressEvent) -> usize {
        let Some(sender) = self.channels.get(&project_id).map(|s| s.value().clone()) else {
            trace!(project_id = %project_id, event = event.event_type(), "No subscribers");
            return 0;
        };

        if let Ok(reached) = sender.send(event) {
            trace!(project_id = %project_id, reached, "Progress event published");
            reached
        } else {
            drop(sender);
            self.channels
                .remove_if(&project_id, |_, s| s.receiver_count() == 0);
            0
        }
    }

    /// Live subscribers of a project.
    #[must_use]
    pub fn subscriber_count(&self, project_id: ProjectId) -> usize {
        self.channels
            .get(&project_id)
            .map_or(0, |s| s.receiver_count())
    }

    /// Number of projects with an open channel.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Closes a project's channel; its subscribers see [`SubscriptionError::Closed`]
    /// once they have drained what was already sent.
    pub fn close(&self, project_id: ProjectId) {
        self.channels.remove(&project_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProjectStatus;

    fn change(status: ProjectStatus) -> ProgressEvent {
        ProgressEvent::status_change(status, 0.0)
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event() {
        let broadcaster = ProgressBroadcaster::default();
        let id = ProjectId::new();
        let mut a = broadcaster.subscribe(id);
        let mut b = broadcaster.subscribe(id);

        assert_eq!(broadcaster.publish(id, change(ProjectStatus::GeneratingScript)), 2);
        assert_eq!(broadcaster.publish(id, change(ProjectStatus::Casting)), 2);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.unwrap().status(), Some(ProjectStatus::GeneratingScript));
            assert_eq!(sub.recv().await.unwrap().status(), Some(ProjectStatus::Casting));
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let broadcaster = ProgressBroadcaster::default();
        let id = ProjectId::new();
        let _early = broadcaster.subscribe(id);
        broadcaster.publish(id, change(ProjectStatus::GeneratingScript));

        let mut late = broadcaster.subscribe(id);
        assert_eq!(late.try_recv().unwrap(), None);

        broadcaster.publish(id, change(ProjectStatus::Casting));
        assert_eq!(late.recv().await.unwrap().status(), Some(ProjectStatus::Casting));
    }

    #[test]
    fn test_projects_are_isolated() {
        let broadcaster = ProgressBroadcaster::default();
        let a = ProjectId::new();
        let b = ProjectId::new();
        let mut sub_a = broadcaster.subscribe(a);
        let _sub_b = broadcaster.subscribe(b);

        broadcaster.publish(b, change(ProjectStatus::Casting));
        assert_eq!(sub_a.try_recv().unwrap(), None);
    }

    #[test]
    fn test_publish_without_subscribers_prunes_channel() {
        let broadcaster = ProgressBroadcaster::default();
        let id = ProjectId::new();
        assert_eq!(broadcaster.publish(id, change(ProjectStatus::Casting)), 0);

        let sub = broadcaster.subscribe(id);
        drop(sub);
        assert_eq!(broadcaster.channel_count(), 1);
        assert_eq!(broadcaster.publish(id, change(ProjectStatus::Casting)), 0);
        assert_eq!(broadcaster.channel_count(), 0);
    }

    #[test]
    fn test_lagging_subscriber_is_told() {
        let broadcaster = ProgressBroadcaster::new(2);
        let id = ProjectId::new();
        let mut sub = broadcaster.subscribe(id);

        for _ in 0..5 {
            broadcaster.publish(id, change(ProjectStatus::Casting));
        }

        assert_eq!(sub.try_recv(), Err(SubscriptionError::Lagged { missed: 3 }));
        // after the lag report the receiver resumes at the oldest retained event
        assert!(sub.try_recv().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let broadcaster = ProgressBroadcaster::default();
        let id = ProjectId::new();
        let mut sub = broadcaster.subscribe(id);
        broadcaster.publish(id, change(ProjectStatus::Casting));
        broadcaster.close(id);

        assert!(sub.recv().await.is_ok());
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
    }
}
