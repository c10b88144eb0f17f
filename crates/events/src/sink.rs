//! The notification seam used by the job engine.
//!
//! The engine only decides *that* and *what* to notify: it hands an event
//! kind and a context map to a [`NotificationSink`]. Delivery is the sink's
//! concern.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::bus::{EventBus, PlatformEvent};

/// Errors returned by a notification sink.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No subscribers for event '{0}'")]
    NoSubscribers(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Accepts `(event_kind, context)` pairs.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        event_kind: &str,
        context: Map<String, Value>,
    ) -> Result<(), NotifyError>;
}

#[async_trait]
impl NotificationSink for EventBus {
    /// Publish the context as a [`PlatformEvent`].
    ///
    /// `job_id` and `requested_by_id` context entries, when they are
    /// strings, are lifted onto the envelope.
    async fn notify(
        &self,
        event_kind: &str,
        context: Map<String, Value>,
    ) -> Result<(), NotifyError> {
        let mut event = PlatformEvent::new(event_kind);
        if let Some(job_id) = context.get("job_id").and_then(Value::as_str) {
            event = event.with_job(job_id);
        }
        if let Some(actor) = context.get("requested_by_id").and_then(Value::as_str) {
            event = event.with_actor(actor);
        }
        let event = event.with_payload(Value::Object(context));

        match self.publish(event) {
            0 => Err(NotifyError::NoSubscribers(event_kind.to_string())),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn bus_sink_lifts_job_and_actor() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let context = json!({"job_id": "abcd1234", "requested_by_id": "u1", "status": "completed"})
            .as_object()
            .cloned()
            .expect("object");

        bus.notify("job.completed", context).await.expect("delivered");

        let event = rx.recv().await.expect("event");
        assert_eq!(event.event_type, "job.completed");
        assert_eq!(event.job_id.as_deref(), Some("abcd1234"));
        assert_eq!(event.actor_user_id.as_deref(), Some("u1"));
        assert_eq!(event.payload["status"], "completed");
    }

    #[tokio::test]
    async fn bus_sink_without_subscribers_errors() {
        let bus = EventBus::default();
        let result = bus.notify("job.failed", Map::new()).await;
        assert!(matches!(result, Err(NotifyError::NoSubscribers(kind)) if kind == "job.failed"));
    }
}
