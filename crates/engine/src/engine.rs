//! The job engine: accepts requests, runs them in background tasks, and
//! drives each job to exactly one terminal transition.
//!
//! Every job follows the same path:
//!
//! 1. The record is created as `running`, registered and persisted before
//!    the caller gets its id back.
//! 2. A tracked task writes a start banner and dispatches the action.
//! 3. The task appends the exit banner, performs the terminal transition,
//!    persists the final snapshot and emits one notification.
//! 4. The completion signal is raised for anything waiting on the job, even
//!    when a store or notification sink panics during step 3.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::task::TaskTracker;

use opsdeck_core::error::CoreError;
use opsdeck_core::job::{Job, JobStatus};
use opsdeck_core::output;
use opsdeck_core::store::JobStore;
use opsdeck_core::types::JobId;
use opsdeck_events::NotificationSink;

use crate::catalog::ScriptCatalog;
use crate::config::EngineConfig;
use crate::dispatcher::ActionDispatcher;
use crate::hooks::SyncHooks;
use crate::notifier::CompletionNotifier;
use crate::registry::{JobHandle, JobRegistry};
use crate::request::JobRequest;

/// Owns the registry, the store seam and every background job task.
pub struct JobEngine {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    dispatcher: ActionDispatcher,
    notifier: CompletionNotifier,
    tasks: TaskTracker,
}

impl JobEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn JobStore>,
        notifications: Arc<dyn NotificationSink>,
        catalog: Arc<dyn ScriptCatalog>,
        hooks: Arc<dyn SyncHooks>,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            store,
            dispatcher: ActionDispatcher::new(Arc::clone(&config), catalog, hooks),
            notifier: CompletionNotifier::new(notifications, config),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        self.dispatcher.config()
    }

    pub(crate) fn notifier(&self) -> &CompletionNotifier {
        &self.notifier
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Accept a request and start it in the background.
    ///
    /// Returns the new job's id as soon as the record is registered.
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobId, CoreError> {
        validate_request(&request)?;

        let handle = self.create(|id| job_for(id, &request, None)).await;
        let job_id = handle.id().to_string();
        tracing::info!(
            job_id = %job_id,
            target_name = %request.target,
            action = %request.action,
            kind = %request.definition,
            "Job accepted",
        );

        self.spawn_job(handle, request);
        Ok(job_id)
    }

    /// Snapshot of a job, including partial output while it runs.
    ///
    /// Jobs unknown to this process are looked up in the durable store.
    pub async fn get_job(&self, id: &str) -> Result<Job, CoreError> {
        if let Some(job) = self.registry.snapshot(id).await {
            return Ok(job);
        }
        match self.store.find_by_id(id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(CoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            }),
            Err(e) => Err(CoreError::Internal(e.to_string())),
        }
    }

    /// Wait for a job to settle and return its final snapshot.
    pub async fn wait(&self, id: &str) -> Result<Job, CoreError> {
        match self.registry.get(id).await {
            Some(handle) => {
                handle.wait_terminal().await;
                Ok(handle.snapshot().await)
            }
            None => self.get_job(id).await,
        }
    }

    /// Stop accepting tracked work and wait for every running job.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    // -- internals shared with the bulk coordinator --------------------------

    /// Register a new job and persist its initial snapshot.
    pub(crate) async fn create<F>(&self, build: F) -> Arc<JobHandle>
    where
        F: FnOnce(JobId) -> Job,
    {
        let handle = self.registry.register(build).await;
        self.persist(&handle.snapshot().await).await;
        handle
    }

    /// Run `request` for an already registered job in a tracked task.
    pub(crate) fn spawn_job(self: &Arc<Self>, handle: Arc<JobHandle>, request: JobRequest) {
        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            engine.execute(handle, request).await;
        });
    }

    async fn execute(&self, handle: Arc<JobHandle>, request: JobRequest) {
        self.complete_with(&handle, async {
            handle
                .push_line(output::start_banner(&request.action, &request.target))
                .await;

            let dispatch = self.dispatcher.dispatch(&request, handle.as_ref());
            let success = match AssertUnwindSafe(dispatch).catch_unwind().await {
                Ok(success) => success,
                Err(_) => {
                    tracing::error!(job_id = %handle.id(), "Action panicked");
                    handle
                        .push_line(output::error_line("Internal error while running the action"))
                        .await;
                    false
                }
            };

            let status = JobStatus::from_success(success);
            if let Some(job) = self.settle(&handle, status).await {
                self.notifier.job_finished(&job).await;
            }
        })
        .await;
    }

    /// Run the settling work for `handle`, then raise its completion signal.
    ///
    /// The signal is raised even if `work` panics. A job the panic left
    /// `running` is failed in memory first, so waiters always see a
    /// terminal status.
    pub(crate) async fn complete_with<F>(&self, handle: &JobHandle, work: F)
    where
        F: Future<Output = ()>,
    {
        if AssertUnwindSafe(work).catch_unwind().await.is_err() {
            tracing::error!(job_id = %handle.id(), "Job task panicked while settling");
            if !handle.status().await.is_terminal() {
                handle
                    .push_line(output::error_line("Internal error while finishing the job"))
                    .await;
                if let Err(e) = handle.finish(JobStatus::Failed).await {
                    tracing::error!(
                        job_id = %handle.id(),
                        error = %e,
                        "Rejected terminal transition",
                    );
                }
            }
        }
        handle.announce(handle.status().await);
    }

    /// Append the exit banner, make the terminal transition and persist.
    ///
    /// Returns the final snapshot, or `None` if the job was already terminal.
    pub(crate) async fn settle(&self, handle: &JobHandle, status: JobStatus) -> Option<Job> {
        let current = handle.snapshot().await;
        handle
            .push_line(output::exit_banner(
                &current.action,
                &current.target,
                status.as_str(),
            ))
            .await;

        match handle.finish(status).await {
            Ok(job) => {
                tracing::info!(
                    job_id = %job.id,
                    status = %job.status,
                    lines = job.output.len(),
                    "Job finished",
                );
                self.persist(&job).await;
                Some(job)
            }
            Err(e) => {
                tracing::error!(job_id = %handle.id(), error = %e, "Rejected terminal transition");
                None
            }
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.upsert(job).await {
            tracing::warn!(
                job_id = %job.id,
                status = %job.status,
                error = %e,
                "Failed to persist job",
            );
        }
    }
}

/// Build the initial record for a single-target request.
pub(crate) fn job_for(id: JobId, request: &JobRequest, parent_id: Option<JobId>) -> Job {
    Job::new(
        id,
        &request.target,
        &request.action,
        request.definition.script_name().map(str::to_string),
    )
    .with_requester(request.requested_by.clone())
    .with_parent(parent_id)
    .with_inputs(request.inputs.clone())
}

fn validate_request(request: &JobRequest) -> Result<(), CoreError> {
    if request.target.trim().is_empty() {
        return Err(CoreError::Validation("Target must not be empty".into()));
    }
    if request.action.trim().is_empty() {
        return Err(CoreError::Validation("Action must not be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use opsdeck_core::actions::ActionKind;

    use super::*;

    #[test]
    fn blank_target_is_rejected() {
        let request = JobRequest::new(
            "  ",
            "deploy",
            ActionKind::Script {
                script: "deploy".into(),
                inputs: vec![],
            },
        );
        assert_matches!(validate_request(&request), Err(CoreError::Validation(_)));
    }

    #[test]
    fn initial_record_uses_script_name() {
        let request = JobRequest::new(
            "svc1",
            "rotate",
            ActionKind::DynamicScripts {
                script: "rotate_keys".into(),
            },
        );
        let job = job_for("abcd1234".into(), &request, Some("parent01".into()));
        assert_eq!(job.script.as_deref(), Some("rotate_keys"));
        assert_eq!(job.parent_id.as_deref(), Some("parent01"));
        assert_eq!(job.status, JobStatus::Running);
    }
}
