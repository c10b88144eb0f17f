//! Best-effort hooks run after a successful action.
//!
//! A hook failure is reported as a `[Warning: ...]` line and a
//! `tracing::warn!` by the dispatcher; it never changes a job's status.

use std::time::Duration;

use async_trait::async_trait;

use opsdeck_core::scripting::executor::{OutputSink, ProcessSpec};
use opsdeck_core::scripting::subprocess;

use crate::config::EngineConfig;

/// Environment variable carrying the hook's target.
pub const HOOK_TARGET_ENV: &str = "OPSDECK_TARGET";

/// Name of the post-success output sync hook.
pub const SYNC_OUTPUTS_HOOK: &str = "sync_outputs";

/// Name of the inventory cache reconciliation hook.
pub const RECONCILE_INVENTORY_HOOK: &str = "reconcile_inventory";

/// Errors returned by a [`SyncHooks`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{hook} hook exited with code {code}")]
    Failed { hook: &'static str, code: i32 },

    #[error("{hook} hook could not run: {message}")]
    Launch { hook: &'static str, message: String },
}

/// Follow-up operations triggered by successful jobs.
#[async_trait]
pub trait SyncHooks: Send + Sync {
    /// Sync outputs and credentials produced by a script run on `target`.
    async fn sync_outputs(&self, target: &str) -> Result<(), HookError>;

    /// Reconcile the cached inventory after `target` was destroyed or refreshed.
    async fn reconcile_inventory(&self, target: &str) -> Result<(), HookError>;
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl SyncHooks for NoopHooks {
    async fn sync_outputs(&self, _target: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn reconcile_inventory(&self, _target: &str) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks implemented as external commands.
///
/// Each configured command runs with [`HOOK_TARGET_ENV`] set to the target.
/// An unset command is a no-op.
#[derive(Debug, Clone)]
pub struct CommandHooks {
    sync_outputs: Option<Vec<String>>,
    reconcile_inventory: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandHooks {
    pub fn new(
        sync_outputs: Option<Vec<String>>,
        reconcile_inventory: Option<Vec<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            sync_outputs,
            reconcile_inventory,
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.sync_outputs_command.clone(),
            config.reconcile_inventory_command.clone(),
            config.hook_timeout,
        )
    }

    async fn run(
        &self,
        hook: &'static str,
        argv: Option<&[String]>,
        target: &str,
    ) -> Result<(), HookError> {
        let Some(spec) = argv.and_then(ProcessSpec::from_argv) else {
            return Ok(());
        };
        let spec = spec
            .envs(vec![(HOOK_TARGET_ENV.to_string(), target.to_string())])
            .timeout(self.timeout);

        let sink = HookLog { hook, target };
        match subprocess::run_command(&spec, &sink).await {
            Ok(0) => {
                tracing::debug!(hook, job_target = %target, "Hook completed");
                Ok(())
            }
            Ok(code) => Err(HookError::Failed { hook, code }),
            Err(e) => Err(HookError::Launch {
                hook,
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SyncHooks for CommandHooks {
    async fn sync_outputs(&self, target: &str) -> Result<(), HookError> {
        self.run(SYNC_OUTPUTS_HOOK, self.sync_outputs.as_deref(), target)
            .await
    }

    async fn reconcile_inventory(&self, target: &str) -> Result<(), HookError> {
        self.run(
            RECONCILE_INVENTORY_HOOK,
            self.reconcile_inventory.as_deref(),
            target,
        )
        .await
    }
}

/// Forwards hook output to the log instead of a job's output trail.
struct HookLog<'a> {
    hook: &'static str,
    target: &'a str,
}

#[async_trait]
impl OutputSink for HookLog<'_> {
    async fn push_line(&self, line: String) {
        tracing::debug!(hook = self.hook, job_target = %self.target, "{line}");
    }

    async fn capture_token(&self, _token: String) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Option<Vec<String>> {
        Some(vec!["bash".into(), "-c".into(), script.into()])
    }

    #[tokio::test]
    async fn unset_commands_are_noops() {
        let hooks = CommandHooks::new(None, None, Duration::from_secs(5));
        assert!(hooks.sync_outputs("svc1").await.is_ok());
        assert!(hooks.reconcile_inventory("svc1").await.is_ok());
    }

    #[tokio::test]
    async fn target_is_exported() {
        let hooks = CommandHooks::new(
            sh(r#"test "$OPSDECK_TARGET" = svc1"#),
            None,
            Duration::from_secs(5),
        );
        assert!(hooks.sync_outputs("svc1").await.is_ok());
        assert_matches!(
            hooks.sync_outputs("svc2").await,
            Err(HookError::Failed {
                hook: SYNC_OUTPUTS_HOOK,
                code: 1,
            })
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let hooks = CommandHooks::new(
            None,
            Some(vec!["/nonexistent/reconcile".into()]),
            Duration::from_secs(5),
        );
        let err = hooks.reconcile_inventory("srv1").await.unwrap_err();
        assert_matches!(
            err,
            HookError::Launch {
                hook: RECONCILE_INVENTORY_HOOK,
                ..
            }
        );
        assert!(err.to_string().starts_with("reconcile_inventory hook could not run"));
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let hooks = CommandHooks::new(sh("sleep 5"), None, Duration::from_millis(100));
        let err = hooks.sync_outputs("svc1").await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err}");
    }
}
