//! Asynchronous job orchestration.
//!
//! [`JobEngine`] accepts [`JobRequest`]s, returns a job id immediately and
//! runs the work in a tracked background task. [`BulkCoordinator`] fans one
//! action out over many targets under a parent job. Collaborators plug in
//! through traits: [`JobStore`](opsdeck_core::store::JobStore),
//! [`NotificationSink`](opsdeck_events::NotificationSink),
//! [`ScriptCatalog`] and [`SyncHooks`].

pub mod bulk;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod hooks;
pub mod notifier;
pub mod registry;
pub mod request;
pub mod store;

pub use bulk::BulkCoordinator;
pub use catalog::{FsScriptCatalog, ScriptCatalog};
pub use config::{ConfigError, EngineConfig};
pub use dispatcher::ActionDispatcher;
pub use engine::JobEngine;
pub use hooks::{CommandHooks, HookError, NoopHooks, SyncHooks};
pub use notifier::{BulkSummary, CompletionNotifier, Severity};
pub use registry::{JobHandle, JobRegistry};
pub use request::{BulkRequest, JobRequest};
pub use store::MemoryJobStore;
