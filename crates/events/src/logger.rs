//! Notification logging service.
//!
//! [`NotificationLogger`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! broadcast channel and writes every received [`PlatformEvent`] to the
//! tracing log. It runs as a long-lived background task and shuts down
//! gracefully when the bus sender is dropped.

use tokio::sync::broadcast;

use crate::bus::PlatformEvent;

/// Background service that logs every notification event.
pub struct NotificationLogger;

impl NotificationLogger {
    /// Run the logging loop until the channel is closed.
    ///
    /// Returns the number of events logged.
    pub async fn run(mut receiver: broadcast::Receiver<PlatformEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let severity = event
                        .payload
                        .get("severity")
                        .and_then(|v| v.as_str())
                        .unwrap_or("info");
                    tracing::info!(
                        event_type = %event.event_type,
                        job_id = event.job_id.as_deref().unwrap_or("-"),
                        severity,
                        payload = %event.payload,
                        "Notification"
                    );
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Notification logger lagged, some events were not logged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification logger shutting down");
                    break;
                }
            }
        }
        logged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn logs_until_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(NotificationLogger::run(bus.subscribe()));

        bus.publish(PlatformEvent::new("job.completed"));
        bus.publish(PlatformEvent::new("bulk.completed"));
        drop(bus);

        let logged = handle.await.expect("logger task");
        assert_eq!(logged, 2);
    }
}
