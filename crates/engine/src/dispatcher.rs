//! Turns a [`JobRequest`] into concrete commands.
//!
//! [`ActionDispatcher::dispatch`] matches exhaustively on [`ActionKind`].
//! Configuration problems (missing files, unregistered scripts, missing
//! required inputs) are written as `[ERROR: ...]` lines and fail the job
//! without launching anything. Post-success hooks are best effort.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use opsdeck_core::actions::{
    build_input_env, missing_required_inputs, resolve_playbook_vars, ActionKind, InputSpec,
    TargetKind,
};
use opsdeck_core::output;
use opsdeck_core::scripting::executor::{OutputSink, ProcessExecutor, ProcessSpec};

use crate::catalog::{is_safe_segment, ScriptCatalog};
use crate::config::EngineConfig;
use crate::hooks::{HookError, SyncHooks};
use crate::request::JobRequest;

/// Action name prefixes that trigger inventory reconciliation on servers.
const RECONCILE_ACTIONS: [&str; 2] = ["destroy", "refresh"];

/// Executes the work described by a request.
pub struct ActionDispatcher {
    config: Arc<EngineConfig>,
    catalog: Arc<dyn ScriptCatalog>,
    hooks: Arc<dyn SyncHooks>,
    executor: ProcessExecutor,
}

impl ActionDispatcher {
    pub fn new(
        config: Arc<EngineConfig>,
        catalog: Arc<dyn ScriptCatalog>,
        hooks: Arc<dyn SyncHooks>,
    ) -> Self {
        Self {
            config,
            catalog,
            hooks,
            executor: ProcessExecutor,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the request's action, writing its trail into `sink`.
    ///
    /// Returns the success flag the job's terminal status is derived from.
    pub async fn dispatch(&self, request: &JobRequest, sink: &dyn OutputSink) -> bool {
        let success = match &request.definition {
            ActionKind::Script { script, inputs } => {
                if let Err(message) = check_segments(&request.target, script) {
                    return fail(sink, message).await;
                }
                let path = self.config.script_path(&request.target, script);
                self.run_script(request, &path, inputs, sink).await
            }
            ActionKind::ScriptStop { playbook } => {
                self.run_filtered_stop(request, playbook, sink).await
            }
            ActionKind::Playbook { playbook, vars } => {
                let Some(path) = self.resolve_playbook(playbook, sink).await else {
                    return false;
                };
                let extra_vars = resolve_playbook_vars(vars, &request.subject);
                let mut spec = ProcessSpec::new(&self.config.ansible_playbook_bin)
                    .arg("-i")
                    .arg(self.config.inventory_path.display().to_string())
                    .arg(path.display().to_string());
                for (key, value) in extra_vars {
                    spec = spec.arg("-e").arg(format!("{key}={value}"));
                }
                self.executor.run(spec, sink).await
            }
            ActionKind::DynamicScripts { script } => {
                let Some(entry) = self.catalog.lookup(&request.target, script).await else {
                    return fail(
                        sink,
                        format!("Script '{script}' is not registered for {}", request.target),
                    )
                    .await;
                };
                self.run_script(request, &entry.path, &entry.inputs, sink).await
            }
        };

        if success {
            self.after_success(request, sink).await;
        }
        success
    }

    /// Run a shell script with `INPUT_*` variables from the request.
    async fn run_script(
        &self,
        request: &JobRequest,
        path: &Path,
        schema: &[InputSpec],
        sink: &dyn OutputSink,
    ) -> bool {
        if !file_exists(path).await {
            return fail(sink, format!("Script not found: {}", path.display())).await;
        }
        let missing = missing_required_inputs(schema, &request.inputs);
        if !missing.is_empty() {
            return fail(
                sink,
                format!("Missing required input: {}", missing.join(", ")),
            )
            .await;
        }

        let mut spec = ProcessSpec::new("bash")
            .arg(path.display().to_string())
            .envs(build_input_env(&request.inputs, request.requested_by.as_ref()));
        if let Some(dir) = path.parent() {
            spec = spec.current_dir(dir);
        }
        self.executor.run(spec, sink).await
    }

    /// Regenerate the inventory, then run the stop playbook for one target.
    ///
    /// Only the playbook step decides the result.
    async fn run_filtered_stop(
        &self,
        request: &JobRequest,
        playbook: &str,
        sink: &dyn OutputSink,
    ) -> bool {
        match ProcessSpec::from_argv(&self.config.inventory_command) {
            Some(spec) => {
                let spec = spec.timeout(self.config.inventory_timeout);
                if !self.executor.run(spec, sink).await {
                    tracing::warn!(target_name = %request.target, "Inventory regeneration failed");
                    sink.push_line(output::warning_line(
                        "Inventory regeneration failed, continuing with the existing inventory",
                    ))
                    .await;
                }
            }
            None => {
                sink.push_line(output::warning_line(
                    "No inventory command configured, using the existing inventory",
                ))
                .await;
            }
        }

        let Some(path) = self.resolve_playbook(playbook, sink).await else {
            return false;
        };
        let spec = ProcessSpec::new(&self.config.ansible_playbook_bin)
            .arg("-i")
            .arg(self.config.inventory_path.display().to_string())
            .arg(path.display().to_string())
            .arg("--limit")
            .arg(&request.target);
        self.executor.run(spec, sink).await
    }

    /// Resolve a playbook name to an existing file, or record why not.
    async fn resolve_playbook(&self, playbook: &str, sink: &dyn OutputSink) -> Option<PathBuf> {
        if !is_relative_inside(Path::new(playbook)) {
            fail(sink, format!("Invalid playbook name: {playbook}")).await;
            return None;
        }
        let path = self.config.playbook_path(playbook);
        if !file_exists(&path).await {
            fail(sink, format!("Playbook not found: {}", path.display())).await;
            return None;
        }
        Some(path)
    }

    async fn after_success(&self, request: &JobRequest, sink: &dyn OutputSink) {
        if matches!(
            request.definition,
            ActionKind::Script { .. } | ActionKind::DynamicScripts { .. }
        ) {
            let result = self.hooks.sync_outputs(&request.target).await;
            warn_on_hook_error(result, request, sink).await;
        }

        if request.target_kind == TargetKind::Server && triggers_reconcile(&request.action) {
            let result = self.hooks.reconcile_inventory(&request.target).await;
            warn_on_hook_error(result, request, sink).await;
        }
    }
}

/// Whether a server action should reconcile the inventory cache afterwards.
pub fn triggers_reconcile(action: &str) -> bool {
    RECONCILE_ACTIONS.iter().any(|name| {
        action == *name
            || action
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('_'))
    })
}

async fn warn_on_hook_error(
    result: Result<(), HookError>,
    request: &JobRequest,
    sink: &dyn OutputSink,
) {
    if let Err(e) = result {
        tracing::warn!(
            target_name = %request.target,
            action = %request.action,
            error = %e,
            "Post-success hook failed",
        );
        sink.push_line(output::warning_line(&e)).await;
    }
}

async fn fail(sink: &dyn OutputSink, message: String) -> bool {
    sink.push_line(output::error_line(message)).await;
    false
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn check_segments(target: &str, script: &str) -> Result<(), String> {
    if !is_safe_segment(target) {
        return Err(format!("Invalid target name: {target}"));
    }
    if !is_safe_segment(script) {
        return Err(format!("Invalid script name: {script}"));
    }
    Ok(())
}

fn is_relative_inside(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
        && path.components().next().is_some()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_actions() {
        assert!(triggers_reconcile("destroy"));
        assert!(triggers_reconcile("destroy_instance"));
        assert!(triggers_reconcile("refresh"));
        assert!(!triggers_reconcile("deploy"));
        assert!(!triggers_reconcile("refreshments"));
    }

    #[test]
    fn playbook_names_stay_inside_root() {
        assert!(is_relative_inside(Path::new("stop.yml")));
        assert!(is_relative_inside(Path::new("snapshots/create.yml")));
        assert!(!is_relative_inside(Path::new("../etc/passwd")));
        assert!(!is_relative_inside(Path::new("/etc/passwd")));
        assert!(!is_relative_inside(Path::new("")));
    }

    #[test]
    fn segment_errors_name_the_offender() {
        assert_eq!(
            check_segments("../x", "deploy").unwrap_err(),
            "Invalid target name: ../x"
        );
        assert!(check_segments("svc1", "deploy").is_ok());
    }
}
