//! Script catalog used by the `dynamic_scripts` action kind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use opsdeck_core::actions::{InputSpec, ScriptEntry};

/// Resolves `(target, script)` to a concrete script and its input schema.
#[async_trait]
pub trait ScriptCatalog: Send + Sync {
    async fn lookup(&self, target: &str, script: &str) -> Option<ScriptEntry>;
}

/// Catalog laid out on disk as `<root>/<target>/<script>.sh`, with an
/// optional `<script>.inputs.json` array of [`InputSpec`] next to it.
#[derive(Debug, Clone)]
pub struct FsScriptCatalog {
    root: PathBuf,
}

impl FsScriptCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_schema(path: &Path) -> Vec<InputSpec> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read input schema");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid input schema");
                Vec::new()
            }
        }
    }
}

/// Whether `segment` is safe to use as a single path component.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
        && !segment.contains('\0')
}

#[async_trait]
impl ScriptCatalog for FsScriptCatalog {
    async fn lookup(&self, target: &str, script: &str) -> Option<ScriptEntry> {
        if !is_safe_segment(target) || !is_safe_segment(script) {
            return None;
        }
        let dir = self.root.join(target);
        let path = dir.join(format!("{script}.sh"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }
        let inputs = Self::read_schema(&dir.join(format!("{script}.inputs.json"))).await;
        Some(ScriptEntry { path, inputs })
    }
}
