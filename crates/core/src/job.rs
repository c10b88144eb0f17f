//! Job record: the unit of trackable work.
//!
//! A [`Job`] is created in the `running` state, accumulates output lines
//! while its owning task executes, and transitions exactly once to a
//! terminal state. The record enforces its own invariants (append-only
//! output, first-match token capture, single terminal transition) so the
//! engine cannot violate them by accident.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Length of a generated job id.
pub const JOB_ID_LENGTH: usize = 8;

/// Generate a short opaque job id.
///
/// Uniqueness within a registry is enforced by the registry itself, which
/// regenerates on collision.
pub fn new_job_id() -> JobId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LENGTH);
    id
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid job status: '{s}'. Must be one of: running, completed, failed"
            ))),
        }
    }

    /// Whether no further transition can occur from this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Map a success flag to the matching terminal status.
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Identity of the user that initiated a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub display_name: String,
}

impl Requester {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A tracked unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Logical subject: a service name, `"all"`, or `"bulk (N services)"`.
    pub target: String,
    /// Short verb describing the work (`deploy`, `stop`, `bulk_stop`, ...).
    pub action: String,
    pub script: Option<String>,
    pub status: JobStatus,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub output: Vec<String>,
    pub embedded_token: Option<String>,
    pub requested_by: Option<Requester>,
    pub parent_id: Option<JobId>,
    /// Ids of the children spawned for a bulk parent. Empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<JobId>,
    /// Parameters supplied with the request, kept for audit and replay.
    pub inputs: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Create a new job in the `running` state.
    pub fn new(
        id: JobId,
        target: impl Into<String>,
        action: impl Into<String>,
        script: Option<String>,
    ) -> Self {
        Self {
            id,
            target: target.into(),
            action: action.into(),
            script,
            status: JobStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
            output: Vec::new(),
            embedded_token: None,
            requested_by: None,
            parent_id: None,
            child_ids: Vec::new(),
            inputs: serde_json::Map::new(),
        }
    }

    pub fn with_requester(mut self, requester: Option<Requester>) -> Self {
        self.requested_by = requester;
        self
    }

    pub fn with_parent(mut self, parent_id: Option<JobId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_inputs(mut self, inputs: serde_json::Map<String, serde_json::Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// The label used in notifications: script name when present, else the action.
    pub fn label(&self) -> &str {
        self.script.as_deref().unwrap_or(&self.action)
    }

    /// Append one line of output.
    ///
    /// Lines appended after the terminal transition are dropped: the output
    /// trail is frozen once the job is terminal.
    pub fn push_line(&mut self, line: impl Into<String>) {
        if self.status.is_terminal() {
            tracing::warn!(job_id = %self.id, "Dropping output line for terminal job");
            return;
        }
        self.output.push(line.into());
    }

    /// Store the embedded token unless one was already captured.
    ///
    /// Returns `true` if the token was stored.
    pub fn capture_token(&mut self, token: impl Into<String>) -> bool {
        if self.embedded_token.is_some() {
            return false;
        }
        self.embedded_token = Some(token.into());
        true
    }

    /// Perform the single terminal transition.
    pub fn finish(&mut self, status: JobStatus) -> Result<(), CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "Job {} cannot finish with non-terminal status '{status}'",
                self.id
            )));
        }
        if self.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {} already finished as '{}'",
                self.id, self.status
            )));
        }
        self.status = status;
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn job() -> Job {
        Job::new(new_job_id(), "svc1", "deploy", Some("deploy".to_string()))
    }

    #[test]
    fn generated_ids_are_short_hex() {
        let id = new_job_id();
        assert_eq!(id.len(), JOB_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_job_is_running_without_finish_time() {
        let job = job();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.finished_at.is_none());
        assert!(job.output.is_empty());
    }

    #[test]
    fn finish_sets_status_and_timestamp_once() {
        let mut job = job();
        job.finish(JobStatus::Completed).expect("first finish");
        let finished_at = job.finished_at.expect("finished_at set");

        let err = job.finish(JobStatus::Failed);
        assert_matches!(err, Err(CoreError::Conflict(_)));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.finished_at, Some(finished_at));
    }

    #[test]
    fn finish_rejects_running() {
        let mut job = job();
        assert_matches!(job.finish(JobStatus::Running), Err(CoreError::Validation(_)));
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn output_is_frozen_after_finish() {
        let mut job = job();
        job.push_line("one");
        job.finish(JobStatus::Failed).expect("finish");
        job.push_line("two");
        assert_eq!(job.output, vec!["one".to_string()]);
    }

    #[test]
    fn token_capture_keeps_first_value() {
        let mut job = job();
        assert!(job.capture_token("abc123"));
        assert!(!job.capture_token("zzz999"));
        assert_eq!(job.embedded_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn label_prefers_script_name() {
        let scripted = job();
        assert_eq!(scripted.label(), "deploy");

        let plain = Job::new(new_job_id(), "all", "stop_all", None);
        assert_eq!(plain.label(), "stop_all");
    }

    #[test]
    fn status_round_trips_through_wire_strings() {
        for status in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert_matches!(JobStatus::from_str("cancelled"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
