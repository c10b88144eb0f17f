//! Durable job store interface.
//!
//! The engine upserts a job snapshot at creation and again at its terminal
//! transition. Implementations must provide create-or-update semantics keyed
//! by job id so that a write can be retried safely.

use async_trait::async_trait;

use crate::job::Job;

/// Errors raised by a durable job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Create-or-update storage for job snapshots.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert the job or replace the stored snapshot with the same id.
    async fn upsert(&self, job: &Job) -> Result<(), StoreError>;

    /// Load a job snapshot by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>, StoreError>;
}
