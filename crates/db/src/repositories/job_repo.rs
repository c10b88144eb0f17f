//! Repository for the `jobs` table.
//!
//! Rows are written only through [`JobRepo::upsert`], keyed by job id, so a
//! write can be retried without creating duplicates.

use sqlx::types::Json;
use sqlx::PgPool;

use opsdeck_core::job::JobStatus;
use opsdeck_core::output;

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, target, action, script, status, started_at, finished_at, \
    output, embedded_token, requested_by_id, requested_by_name, \
    parent_id, child_ids, inputs";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Message appended to jobs left running by a previous process.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by engine restart";

/// Provides persistence operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job or overwrite the stored snapshot with the same id.
    pub async fn upsert(pool: &PgPool, row: &JobRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs (id, target, action, script, status, started_at, finished_at, \
                               output, embedded_token, requested_by_id, requested_by_name, \
                               parent_id, child_ids, inputs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 finished_at = EXCLUDED.finished_at, \
                 output = EXCLUDED.output, \
                 embedded_token = EXCLUDED.embedded_token, \
                 child_ids = EXCLUDED.child_ids, \
                 updated_at = NOW()",
        )
        .bind(&row.id)
        .bind(&row.target)
        .bind(&row.action)
        .bind(&row.script)
        .bind(&row.status)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(&row.output)
        .bind(&row.embedded_token)
        .bind(&row.requested_by_id)
        .bind(&row.requested_by_name)
        .bind(&row.parent_id)
        .bind(&row.child_ids)
        .bind(&row.inputs)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List the most recently started jobs, newest first.
    ///
    /// `limit` defaults to 50 and is capped at 100.
    pub async fn list_recent(
        pool: &PgPool,
        limit: Option<i64>,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let query = format!("SELECT {COLUMNS} FROM jobs ORDER BY started_at DESC LIMIT $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// List the children of a bulk parent in creation order.
    pub async fn list_children(pool: &PgPool, parent_id: &str) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE parent_id = $1 ORDER BY started_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }

    /// Fail every job still marked running by a previous process.
    ///
    /// Must run before the engine accepts new jobs: the tasks that owned
    /// these rows no longer exist. Returns the ids that were failed.
    pub async fn fail_interrupted(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "UPDATE jobs \
             SET status = $1, finished_at = NOW(), updated_at = NOW(), \
                 output = output || $2 \
             WHERE status = $3 \
             RETURNING id",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(Json(vec![output::error_line(INTERRUPTED_MESSAGE)]))
        .bind(JobStatus::Running.as_str())
        .fetch_all(pool)
        .await
    }
}
