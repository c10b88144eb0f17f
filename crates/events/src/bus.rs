//! Broadcast of job completion notices inside the worker process.
//!
//! The engine hands each finished job or bulk operation to an [`EventBus`]
//! as a [`PlatformEvent`]; listeners such as the notification logger hold
//! their own receiver and see every notice published after they subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PlatformEvent
// ---------------------------------------------------------------------------

/// One completion notice, e.g. `job.failed` for a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// `job.completed`, `job.failed` or `bulk.completed`.
    pub event_type: String,

    pub job_id: Option<String>,

    /// Requester of the job, when one was recorded.
    pub actor_user_id: Option<String>,

    /// Notification context: label, severity, link and counts.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    /// A notice of `event_type` stamped with the current time and an empty
    /// context.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            actor_user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_actor(mut self, user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(user_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Notices buffered per receiver before the slowest one starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out point between the engine's notifier and its listeners.
///
/// ```rust
/// use opsdeck_events::bus::{EventBus, PlatformEvent};
///
/// let bus = EventBus::default();
/// let mut notices = bus.subscribe();
///
/// bus.publish(PlatformEvent::new("job.completed").with_job("a1b2c3d4"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    /// A bus that keeps up to `capacity` unread notices per receiver.
    ///
    /// A receiver further behind than that skips the oldest notices and
    /// gets `RecvError::Lagged` once.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Hand `event` to every current receiver and return how many got it.
    ///
    /// With no receivers the notice is discarded and `0` is returned.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_sees_job_and_requester() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = PlatformEvent::new("job.failed")
            .with_job("a1b2c3d4")
            .with_actor("u7")
            .with_payload(serde_json::json!({"severity": "error"}));

        assert_eq!(bus.publish(event), 1);

        let received = rx.recv().await.expect("notice delivered");
        assert_eq!(received.event_type, "job.failed");
        assert_eq!(received.job_id.as_deref(), Some("a1b2c3d4"));
        assert_eq!(received.actor_user_id.as_deref(), Some("u7"));
        assert_eq!(received.payload["severity"], "error");
    }

    #[tokio::test]
    async fn every_listener_gets_its_own_copy() {
        let bus = EventBus::default();
        let mut logger = bus.subscribe();
        let mut audit = bus.subscribe();

        assert_eq!(bus.publish(PlatformEvent::new("bulk.completed")), 2);

        assert_eq!(logger.recv().await.expect("logger").event_type, "bulk.completed");
        assert_eq!(audit.recv().await.expect("audit").event_type, "bulk.completed");
    }

    #[test]
    fn notices_without_listeners_are_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(PlatformEvent::new("job.completed")), 0);
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_notices() {
        let bus = EventBus::default();
        bus.publish(PlatformEvent::new("job.completed").with_job("early001"));

        let mut rx = bus.subscribe();
        bus.publish(PlatformEvent::new("job.completed").with_job("late0001"));

        let received = rx.recv().await.expect("notice delivered");
        assert_eq!(received.job_id.as_deref(), Some("late0001"));
        assert!(received.payload.is_object());
    }
}
