//! Notification event kinds emitted by the engine.
//!
//! Passed as the `event_kind` of every notification so that downstream
//! routing can match on them.

/// A single job finished successfully.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// A single job finished with a failure.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// A bulk group finished (any outcome).
pub const EVENT_BULK_COMPLETED: &str = "bulk.completed";
