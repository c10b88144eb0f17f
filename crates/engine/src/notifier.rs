//! Completion notifications.
//!
//! Builds the context for per-job and per-bulk events and hands it to a
//! [`NotificationSink`]. Delivery failures are logged and swallowed: a job's
//! outcome never depends on whether anybody heard about it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use opsdeck_core::job::{Job, JobStatus};
use opsdeck_core::job_events::{EVENT_BULK_COMPLETED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED};
use opsdeck_events::NotificationSink;

use crate::config::EngineConfig;

/// How an outcome should be presented to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Severity of a single job's terminal status.
    pub fn for_job(status: JobStatus) -> Self {
        match status {
            JobStatus::Failed => Self::Error,
            JobStatus::Running | JobStatus::Completed => Self::Success,
        }
    }

    /// Severity of a bulk outcome: any failure warns, total failure errors.
    pub fn for_bulk(requested: usize, failed: usize) -> Self {
        if failed == 0 {
            Self::Success
        } else if failed >= requested {
            Self::Error
        } else {
            Self::Warning
        }
    }
}

/// Counts reported for a finished bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Emits completion events for jobs and bulk operations.
pub struct CompletionNotifier {
    sink: Arc<dyn NotificationSink>,
    config: Arc<EngineConfig>,
}

impl CompletionNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, config: Arc<EngineConfig>) -> Self {
        Self { sink, config }
    }

    /// Emit `job.completed` or `job.failed` for a terminal job.
    pub async fn job_finished(&self, job: &Job) {
        let event_kind = match job.status {
            JobStatus::Failed => EVENT_JOB_FAILED,
            JobStatus::Running | JobStatus::Completed => EVENT_JOB_COMPLETED,
        };

        let mut context = self.base_context(job);
        context.insert("target".into(), json!(job.target));
        context.insert("action".into(), json!(job.action));
        context.insert("label".into(), json!(job.label()));
        context.insert("status".into(), json!(job.status.as_str()));
        context.insert(
            "severity".into(),
            json!(Severity::for_job(job.status).as_str()),
        );
        if let Some(parent_id) = &job.parent_id {
            context.insert("parent_id".into(), json!(parent_id));
        }
        if let Some(token) = &job.embedded_token {
            context.insert("embedded_token".into(), json!(token));
        }

        self.send(event_kind, context).await;
    }

    /// Emit `bulk.completed` for a finished bulk parent.
    pub async fn bulk_finished(&self, parent: &Job, operation: &str, summary: BulkSummary) {
        let mut context = self.base_context(parent);
        context.insert("operation".into(), json!(operation));
        context.insert("requested".into(), json!(summary.requested));
        context.insert("succeeded".into(), json!(summary.succeeded));
        context.insert("failed".into(), json!(summary.failed));
        context.insert(
            "severity".into(),
            json!(Severity::for_bulk(summary.requested, summary.failed).as_str()),
        );

        self.send(EVENT_BULK_COMPLETED, context).await;
    }

    fn base_context(&self, job: &Job) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("job_id".into(), json!(job.id));
        context.insert("link".into(), json!(self.config.job_link(&job.id)));
        if let Some(requester) = &job.requested_by {
            context.insert("requested_by_id".into(), json!(requester.id));
            context.insert("requested_by_name".into(), json!(requester.display_name));
        }
        context
    }

    async fn send(&self, event_kind: &str, context: Map<String, Value>) {
        let job_id = context
            .get("job_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match self.sink.notify(event_kind, context).await {
            Ok(()) => tracing::debug!(job_id = %job_id, event_kind, "Notification dispatched"),
            Err(e) => tracing::warn!(
                job_id = %job_id,
                event_kind,
                error = %e,
                "Failed to dispatch notification",
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
