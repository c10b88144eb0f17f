//! In-memory index of known jobs.
//!
//! [`JobRegistry`] is an explicit owned store, shared by `Arc`, that maps job
//! ids to [`JobHandle`]s. The map is only ever inserted into; each handle's
//! record is written exclusively by the task that owns the job, while any
//! number of readers take snapshots for status polling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use opsdeck_core::error::CoreError;
use opsdeck_core::job::{new_job_id, Job, JobStatus};
use opsdeck_core::scripting::executor::OutputSink;
use opsdeck_core::types::JobId;

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// A registered job: its live record plus a completion signal.
///
/// The completion signal is raised by [`JobHandle::announce`] after the
/// owning task has persisted and notified, so anything awaiting
/// [`JobHandle::wait_terminal`] observes a fully settled job.
pub struct JobHandle {
    id: JobId,
    record: RwLock<Job>,
    done: watch::Sender<JobStatus>,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let (done, _) = watch::channel(job.status);
        Self {
            id: job.id.clone(),
            record: RwLock::new(job),
            done,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A point-in-time copy of the record, including partial output.
    pub async fn snapshot(&self) -> Job {
        self.record.read().await.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.record.read().await.status
    }

    pub async fn push_line(&self, line: impl Into<String>) {
        self.record.write().await.push_line(line);
    }

    pub(crate) async fn set_child_ids(&self, child_ids: Vec<JobId>) {
        self.record.write().await.child_ids = child_ids;
    }

    /// Perform the terminal transition and return the final snapshot.
    pub(crate) async fn finish(&self, status: JobStatus) -> Result<Job, CoreError> {
        let mut record = self.record.write().await;
        record.finish(status)?;
        Ok(record.clone())
    }

    /// Wake everything waiting on this job's completion.
    pub(crate) fn announce(&self, status: JobStatus) {
        self.done.send_replace(status);
    }

    /// Wait until the job has settled in a terminal state.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.done.subscribe();
        let settled = rx.wait_for(JobStatus::is_terminal).await.map(|status| *status);
        match settled {
            Ok(status) => status,
            // The sender lives as long as `self`; fall back to the record.
            Err(_) => self.status().await,
        }
    }
}

#[async_trait]
impl OutputSink for JobHandle {
    async fn push_line(&self, line: String) {
        self.record.write().await.push_line(line);
    }

    async fn capture_token(&self, token: String) -> bool {
        let captured = self.record.write().await.capture_token(token.clone());
        if captured {
            tracing::info!(job_id = %self.id, token = %token, "Captured deployment id");
        }
        captured
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Index {
    jobs: HashMap<JobId, Arc<JobHandle>>,
    /// Registration order, oldest first.
    order: Vec<JobId>,
}

/// Concurrency-safe index of every job created by this process.
///
/// Entries are never removed; retention is an external concern.
#[derive(Default)]
pub struct JobRegistry {
    index: RwLock<Index>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a unique id, build the job with it, and register it.
    pub async fn register<F>(&self, build: F) -> Arc<JobHandle>
    where
        F: FnOnce(JobId) -> Job,
    {
        let mut index = self.index.write().await;
        let mut id = new_job_id();
        while index.jobs.contains_key(&id) {
            id = new_job_id();
        }
        let handle = Arc::new(JobHandle::new(build(id.clone())));
        index.jobs.insert(id.clone(), Arc::clone(&handle));
        index.order.push(id);
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<JobHandle>> {
        self.index.read().await.jobs.get(id).cloned()
    }

    pub async fn snapshot(&self, id: &str) -> Option<Job> {
        let handle = self.get(id).await?;
        Some(handle.snapshot().await)
    }

    /// Snapshots of all known jobs, newest first.
    pub async fn list(&self) -> Vec<Job> {
        let handles: Vec<Arc<JobHandle>> = {
            let index = self.index.read().await;
            index
                .order
                .iter()
                .rev()
                .filter_map(|id| index.jobs.get(id).cloned())
                .collect()
        };
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            jobs.push(handle.snapshot().await);
        }
        jobs
    }

    /// Snapshots of the children of `parent_id`, in creation order.
    pub async fn children_of(&self, parent_id: &str) -> Vec<Job> {
        let mut children: Vec<Job> = self
            .list()
            .await
            .into_iter()
            .filter(|job| job.parent_id.as_deref() == Some(parent_id))
            .collect();
        children.reverse();
        children
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
