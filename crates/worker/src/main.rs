//! Command-line front end for the job engine.
//!
//! Reads newline-delimited JSON requests from stdin, one per line:
//!
//! ```text
//! {"mode":"single","target":"svc1","action":"deploy","definition":{"kind":"script","script":"deploy"}}
//! {"mode":"bulk","action":"stop","targets":["svc1","svc2"],"definition":{"kind":"script_stop"}}
//! {"mode":"list"}
//! ```
//!
//! Every accepted job id is printed as a JSON line. On end of input the
//! worker waits for all jobs to finish and prints their final status.

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opsdeck_core::store::JobStore;
use opsdeck_core::types::JobId;
use opsdeck_db::repositories::JobRepo;
use opsdeck_engine::{
    BulkCoordinator, BulkRequest, CommandHooks, EngineConfig, FsScriptCatalog, JobEngine,
    JobRequest, MemoryJobStore,
};
use opsdeck_events::{EventBus, NotificationLogger};

/// One line of worker input.
#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum WorkerRequest {
    Single(JobRequest),
    Bulk(BulkRequest),
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdeck_worker=debug,opsdeck_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // --- Configuration ---
    let config = Arc::new(EngineConfig::from_env().context("Invalid engine configuration")?);
    tracing::info!(
        scripts_dir = %config.scripts_dir.display(),
        playbooks_dir = %config.playbooks_dir.display(),
        "Loaded engine configuration",
    );

    // --- Store ---
    let store = open_store().await?;

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(NotificationLogger::run(event_bus.subscribe()));

    // --- Engine ---
    let engine = Arc::new(JobEngine::new(
        Arc::clone(&config),
        store,
        event_bus.clone(),
        Arc::new(FsScriptCatalog::new(&config.dynamic_scripts_dir)),
        Arc::new(CommandHooks::from_config(&config)),
    ));
    let bulk = BulkCoordinator::new(Arc::clone(&engine));
    tracing::info!("Worker ready, reading requests from stdin");

    let accepted = read_requests(&engine, &bulk).await?;

    engine.drain().await;
    for id in &accepted {
        match engine.get_job(id).await {
            Ok(job) => emit(json!({
                "job_id": job.id,
                "target": job.target,
                "action": job.action,
                "status": job.status,
                "embedded_token": job.embedded_token,
            })),
            Err(e) => emit(json!({ "job_id": id, "error": e.to_string() })),
        }
    }

    drop(bulk);
    drop(engine);
    drop(event_bus);
    let logged = logger_handle.await.unwrap_or(0);
    tracing::info!(jobs = accepted.len(), notifications = logged, "Worker finished");
    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store.
async fn open_store() -> anyhow::Result<Arc<dyn JobStore>> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::info!("DATABASE_URL not set, job history is kept in memory");
        return Ok(Arc::new(MemoryJobStore::new()));
    };

    let pool = opsdeck_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    opsdeck_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    opsdeck_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    let interrupted = JobRepo::fail_interrupted(&pool)
        .await
        .context("Failed to recover interrupted jobs")?;
    if !interrupted.is_empty() {
        tracing::warn!(
            count = interrupted.len(),
            ids = ?interrupted,
            "Failed jobs interrupted by restart",
        );
    }

    Ok(Arc::new(opsdeck_db::PgJobStore::new(pool)))
}

/// Submit every request on stdin, returning the ids that were accepted.
async fn read_requests(
    engine: &Arc<JobEngine>,
    bulk: &BulkCoordinator,
) -> anyhow::Result<Vec<JobId>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = Vec::new();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed request");
                emit(json!({ "error": format!("Malformed request: {e}") }));
                continue;
            }
        };

        let submitted = match request {
            WorkerRequest::Single(request) => engine.submit(request).await,
            WorkerRequest::Bulk(request) => bulk.submit(request).await,
            WorkerRequest::List => {
                for job in engine.registry().list().await {
                    emit(json!({
                        "job_id": job.id,
                        "target": job.target,
                        "status": job.status,
                        "lines": job.output.len(),
                    }));
                }
                continue;
            }
        };

        match submitted {
            Ok(id) => {
                emit(json!({ "accepted": id }));
                accepted.push(id);
            }
            Err(e) => emit(json!({ "error": e.to_string() })),
        }
    }
    Ok(accepted)
}

fn emit(value: serde_json::Value) {
    println!("{value}");
}
