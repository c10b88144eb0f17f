//! Fan-out of one action over many targets.
//!
//! A bulk request creates a parent job, one child job per target (each run
//! exactly like a single request), and a coordinator task that waits for
//! every child's completion signal before settling the parent.
//! The parent's own completion signal is raised through
//! `JobEngine::complete_with`, so a panicking collaborator cannot leave
//! it hanging.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;

use opsdeck_core::error::CoreError;
use opsdeck_core::job::{Job, JobStatus};
use opsdeck_core::output;
use opsdeck_core::types::JobId;

use crate::engine::{job_for, JobEngine};
use crate::notifier::BulkSummary;
use crate::registry::JobHandle;
use crate::request::BulkRequest;

/// Starts bulk operations on top of a [`JobEngine`].
#[derive(Clone)]
pub struct BulkCoordinator {
    engine: Arc<JobEngine>,
}

impl BulkCoordinator {
    pub fn new(engine: Arc<JobEngine>) -> Self {
        Self { engine }
    }

    /// Create the parent and its children and start them.
    ///
    /// Returns the parent id immediately; the parent settles once every
    /// child has.
    pub async fn submit(&self, request: BulkRequest) -> Result<JobId, CoreError> {
        validate_bulk(&request)?;

        let mut parent_inputs = request.inputs.clone();
        parent_inputs.insert("targets".into(), json!(request.targets));
        let parent = self
            .engine
            .create(|id| {
                Job::new(
                    id,
                    request.bulk_target(),
                    request.bulk_action(),
                    request.definition.script_name().map(str::to_string),
                )
                .with_requester(request.requested_by.clone())
                .with_inputs(parent_inputs)
            })
            .await;
        let parent_id = parent.id().to_string();
        parent
            .push_line(output::start_banner(&request.bulk_action(), &request.bulk_target()))
            .await;

        let mut children = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            let child_request = request.child_request(target);
            let pid = parent_id.clone();
            let child = self
                .engine
                .create(|id| job_for(id, &child_request, Some(pid)))
                .await;
            parent
                .push_line(format!("{target}: started job {}", child.id()))
                .await;
            children.push((target.clone(), child, child_request));
        }
        parent
            .set_child_ids(children.iter().map(|(_, child, _)| child.id().to_string()).collect())
            .await;

        tracing::info!(
            job_id = %parent_id,
            action = %request.action,
            targets = request.targets.len(),
            "Bulk operation accepted",
        );

        let mut waited = Vec::with_capacity(children.len());
        for (target, child, child_request) in children {
            waited.push((target, Arc::clone(&child)));
            self.engine.spawn_job(child, child_request);
        }

        let engine = Arc::clone(&self.engine);
        let operation = request.action.clone();
        self.engine.tasks().spawn(async move {
            engine
                .complete_with(&parent, settle_parent(&engine, &parent, &operation, waited))
                .await;
        });

        Ok(parent_id)
    }
}

async fn settle_parent(
    engine: &JobEngine,
    parent: &JobHandle,
    operation: &str,
    children: Vec<(String, Arc<JobHandle>)>,
) {
    let statuses = join_all(children.iter().map(|(_, child)| child.wait_terminal())).await;
    let failed_targets: Vec<&str> = children
        .iter()
        .zip(&statuses)
        .filter(|(_, status)| **status == JobStatus::Failed)
        .map(|((target, _), _)| target.as_str())
        .collect();

    let summary = BulkSummary {
        requested: children.len(),
        succeeded: children.len() - failed_targets.len(),
        failed: failed_targets.len(),
    };
    parent
        .push_line(format!(
            "{} succeeded, {} failed",
            summary.succeeded, summary.failed
        ))
        .await;
    if !failed_targets.is_empty() {
        parent
            .push_line(format!("Failed targets: {}", failed_targets.join(", ")))
            .await;
    }

    let status = classify(summary);
    if let Some(job) = engine.settle(parent, status).await {
        engine.notifier().bulk_finished(&job, operation, summary).await;
    }
}

/// Parent status for a finished bulk: failed only when every child failed.
pub fn classify(summary: BulkSummary) -> JobStatus {
    if summary.requested > 0 && summary.failed == summary.requested {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

fn validate_bulk(request: &BulkRequest) -> Result<(), CoreError> {
    if request.targets.is_empty() {
        return Err(CoreError::Validation(
            "Bulk request requires at least one target".into(),
        ));
    }
    if request.targets.iter().any(|t| t.trim().is_empty()) {
        return Err(CoreError::Validation("Targets must not be empty".into()));
    }
    if request.action.trim().is_empty() {
        return Err(CoreError::Validation("Action must not be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
