//! Job row model and conversions to/from the domain [`Job`].

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use opsdeck_core::job::{Job, JobStatus, Requester};
use opsdeck_core::store::StoreError;
use opsdeck_core::types::Timestamp;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: String,
    pub target: String,
    pub action: String,
    pub script: Option<String>,
    pub status: String,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub output: Json<Vec<String>>,
    pub embedded_token: Option<String>,
    pub requested_by_id: Option<String>,
    pub requested_by_name: Option<String>,
    pub parent_id: Option<String>,
    pub child_ids: Json<Vec<String>>,
    pub inputs: Json<serde_json::Map<String, serde_json::Value>>,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            target: job.target.clone(),
            action: job.action.clone(),
            script: job.script.clone(),
            status: job.status.as_str().to_string(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            output: Json(job.output.clone()),
            embedded_token: job.embedded_token.clone(),
            requested_by_id: job.requested_by.as_ref().map(|r| r.id.clone()),
            requested_by_name: job.requested_by.as_ref().map(|r| r.display_name.clone()),
            parent_id: job.parent_id.clone(),
            child_ids: Json(job.child_ids.clone()),
            inputs: Json(job.inputs.clone()),
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).map_err(|e| StoreError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;

        let requested_by = match (row.requested_by_id, row.requested_by_name) {
            (Some(id), Some(name)) => Some(Requester::new(id, name)),
            (Some(id), None) => Some(Requester::new(id.clone(), id)),
            (None, _) => None,
        };

        Ok(Job {
            id: row.id,
            target: row.target,
            action: row.action,
            script: row.script,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            output: row.output.0,
            embedded_token: row.embedded_token,
            requested_by,
            parent_id: row.parent_id,
            child_ids: row.child_ids.0,
            inputs: row.inputs.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use opsdeck_core::job::new_job_id;

    use super::*;

    #[test]
    fn row_round_trips_a_finished_job() {
        let mut job = Job::new(new_job_id(), "svc1", "deploy", Some("deploy".to_string()))
            .with_requester(Some(Requester::new("u1", "alice")))
            .with_parent(Some("parent01".to_string()));
        job.push_line("DEPLOYMENT_ID=abc123");
        job.capture_token("abc123");
        job.finish(JobStatus::Completed).unwrap();

        let row = JobRow::from(&job);
        assert_eq!(row.status, "completed");
        assert_eq!(row.requested_by_name.as_deref(), Some("alice"));

        let back = Job::try_from(row).expect("valid row");
        assert_eq!(back, job);
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let job = Job::new(new_job_id(), "svc1", "stop", None);
        let mut row = JobRow::from(&job);
        row.status = "paused".to_string();

        let err = Job::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
