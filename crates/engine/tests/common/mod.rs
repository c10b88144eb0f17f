//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;

use opsdeck_core::actions::{InputSpec, ScriptEntry};
use opsdeck_engine::hooks::SYNC_OUTPUTS_HOOK;
use opsdeck_engine::{
    BulkCoordinator, EngineConfig, HookError, JobEngine, MemoryJobStore, ScriptCatalog, SyncHooks,
};
use opsdeck_events::{NotificationSink, NotifyError};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Notification sink that keeps every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, Map<String, Value>)>>,
    panic_on: Option<String>,
}

impl RecordingNotifier {
    /// A sink that panics whenever it is handed `kind`.
    pub fn panicking_on(kind: &str) -> Self {
        Self {
            panic_on: Some(kind.to_string()),
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<(String, Map<String, Value>)> {
        self.events.lock().await.clone()
    }

    pub async fn of_kind(&self, kind: &str) -> Vec<Map<String, Value>> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, context)| context.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(
        &self,
        event_kind: &str,
        context: Map<String, Value>,
    ) -> Result<(), NotifyError> {
        if self.panic_on.as_deref() == Some(event_kind) {
            panic!("notification sink exploded on {event_kind}");
        }
        self.events.lock().await.push((event_kind.to_string(), context));
        Ok(())
    }
}

/// Hooks that record their calls and optionally fail `sync_outputs`.
#[derive(Default)]
pub struct RecordingHooks {
    pub fail_sync_with: Option<i32>,
    synced: Mutex<Vec<String>>,
    reconciled: Mutex<Vec<String>>,
}

impl RecordingHooks {
    pub fn failing_sync(code: i32) -> Self {
        Self {
            fail_sync_with: Some(code),
            ..Self::default()
        }
    }

    pub async fn synced(&self) -> Vec<String> {
        self.synced.lock().await.clone()
    }

    pub async fn reconciled(&self) -> Vec<String> {
        self.reconciled.lock().await.clone()
    }
}

#[async_trait]
impl SyncHooks for RecordingHooks {
    async fn sync_outputs(&self, target: &str) -> Result<(), HookError> {
        self.synced.lock().await.push(target.to_string());
        match self.fail_sync_with {
            Some(code) => Err(HookError::Failed {
                hook: SYNC_OUTPUTS_HOOK,
                code,
            }),
            None => Ok(()),
        }
    }

    async fn reconcile_inventory(&self, target: &str) -> Result<(), HookError> {
        self.reconciled.lock().await.push(target.to_string());
        Ok(())
    }
}

/// Catalog backed by a fixed map of `(target, script)` entries.
#[derive(Default)]
pub struct StaticCatalog {
    entries: HashMap<(String, String), ScriptEntry>,
}

impl StaticCatalog {
    pub fn with(
        mut self,
        target: &str,
        script: &str,
        path: PathBuf,
        inputs: Vec<InputSpec>,
    ) -> Self {
        self.entries
            .insert((target.into(), script.into()), ScriptEntry { path, inputs });
        self
    }
}

#[async_trait]
impl ScriptCatalog for StaticCatalog {
    async fn lookup(&self, target: &str, script: &str) -> Option<ScriptEntry> {
        self.entries
            .get(&(target.to_string(), script.to_string()))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A fully wired engine rooted in a temporary directory.
pub struct Harness {
    pub engine: Arc<JobEngine>,
    pub bulk: BulkCoordinator,
    pub store: Arc<MemoryJobStore>,
    pub notifications: Arc<RecordingNotifier>,
    pub hooks: Arc<RecordingHooks>,
    pub config: EngineConfig,
    pub dir: TempDir,
}

pub struct HarnessBuilder {
    dir: TempDir,
    notifications: RecordingNotifier,
    hooks: RecordingHooks,
    catalog: StaticCatalog,
    ansible_body: String,
    inventory_body: String,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for sub in ["scripts", "playbooks", "inventory", "bin"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("create fixture dir");
        }
        Self {
            dir,
            notifications: RecordingNotifier::default(),
            hooks: RecordingHooks::default(),
            catalog: StaticCatalog::default(),
            ansible_body: "echo \"ansible $*\"\n".into(),
            inventory_body: "echo inventory regenerated\n".into(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Body of the fake `ansible-playbook` executable.
    pub fn ansible(mut self, body: &str) -> Self {
        self.ansible_body = body.into();
        self
    }

    /// Body of the inventory regeneration script.
    pub fn inventory(mut self, body: &str) -> Self {
        self.inventory_body = body.into();
        self
    }

    pub fn notifications(mut self, notifications: RecordingNotifier) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn hooks(mut self, hooks: RecordingHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn catalog(mut self, catalog: StaticCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Write `<scripts>/<target>/<name>.sh`.
    pub fn script(self, target: &str, name: &str, body: &str) -> Self {
        write_file(
            &self.dir.path().join("scripts").join(target).join(format!("{name}.sh")),
            body,
        );
        self
    }

    /// Write `<playbooks>/<name>`.
    pub fn playbook(self, name: &str) -> Self {
        write_file(&self.dir.path().join("playbooks").join(name), "- hosts: all\n");
        self
    }

    pub fn build(self) -> Harness {
        let root = self.dir.path();
        let ansible = root.join("bin").join("ansible-playbook");
        write_file(&ansible, &format!("#!/bin/bash\n{}", self.ansible_body));
        std::fs::set_permissions(&ansible, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake ansible");
        let inventory_script = root.join("bin").join("generate_inventory.sh");
        write_file(&inventory_script, &self.inventory_body);

        let config = EngineConfig {
            scripts_dir: root.join("scripts"),
            playbooks_dir: root.join("playbooks"),
            dynamic_scripts_dir: root.join("dynamic"),
            inventory_path: root.join("inventory").join("hosts.ini"),
            inventory_command: vec!["bash".into(), inventory_script.display().to_string()],
            inventory_timeout: Duration::from_secs(10),
            ansible_playbook_bin: ansible.display().to_string(),
            console_base_url: "https://ops.example.com".into(),
            sync_outputs_command: None,
            reconcile_inventory_command: None,
            hook_timeout: Duration::from_secs(5),
        };

        let store = Arc::new(MemoryJobStore::new());
        let notifications = Arc::new(self.notifications);
        let hooks = Arc::new(self.hooks);
        let engine = Arc::new(JobEngine::new(
            Arc::new(config.clone()),
            store.clone(),
            notifications.clone(),
            Arc::new(self.catalog),
            hooks.clone(),
        ));

        Harness {
            bulk: BulkCoordinator::new(Arc::clone(&engine)),
            engine,
            store,
            notifications,
            hooks,
            config,
            dir: self.dir,
        }
    }
}

pub fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, body).expect("write fixture");
}

/// Whether any line records a launched command.
pub fn launched_a_process(output: &[String]) -> bool {
    output.iter().any(|line| line.starts_with("$ "))
}
