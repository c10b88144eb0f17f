//! [`JobStore`] implementation backed by Postgres.

use async_trait::async_trait;

use opsdeck_core::job::Job;
use opsdeck_core::store::{JobStore, StoreError};

use crate::models::job::JobRow;
use crate::repositories::JobRepo;
use crate::DbPool;

/// Durable job store writing through [`JobRepo`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn database_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert(&self, job: &Job) -> Result<(), StoreError> {
        JobRepo::upsert(&self.pool, &JobRow::from(job))
            .await
            .map_err(database_error)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(database_error)?
            .map(Job::try_from)
            .transpose()
    }
}
