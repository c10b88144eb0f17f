//! Opsdeck notification event plumbing.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the notification envelope.
//! - [`NotificationSink`]: the `(event_kind, context)` seam the engine
//!   notifies through.
//! - [`NotificationLogger`]: background subscriber that logs every event.
//!
//! Delivery transports (in-app, email, chat) subscribe to the bus and are
//! not part of this crate.

pub mod bus;
pub mod logger;
pub mod sink;

pub use bus::{EventBus, PlatformEvent};
pub use logger::NotificationLogger;
pub use sink::{NotificationSink, NotifyError};
