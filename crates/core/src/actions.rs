//! Action definitions understood by the dispatcher.
//!
//! [`ActionKind`] is the closed set of execution strategies. Each variant
//! carries only the fields it needs; the engine matches on it exhaustively.
//! This module also holds the pure helpers the dispatcher uses to prepare a
//! command: required-input checks, `INPUT_*` environment construction and
//! `{{ field }}` placeholder substitution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::Requester;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix applied to every caller-supplied input exported to a script.
pub const INPUT_ENV_PREFIX: &str = "INPUT_";

/// Input name auto-filled with the requester's display name.
pub const USERNAME_INPUT: &str = "username";

/// Default playbook for the filtered stop step of [`ActionKind::ScriptStop`].
pub const DEFAULT_STOP_PLAYBOOK: &str = "stop.yml";

/// Regex pattern matching `{{ field }}` placeholders in playbook variables.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// How a job's work is turned into concrete commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Run `<scripts_dir>/<target>/<script>.sh` with `INPUT_*` variables.
    Script {
        script: String,
        #[serde(default)]
        inputs: Vec<InputSpec>,
    },
    /// Regenerate the inventory, then run a stop playbook limited to the target.
    ScriptStop {
        #[serde(default = "default_stop_playbook")]
        playbook: String,
    },
    /// Run a playbook with `-e key=value` variables rendered from subject data.
    Playbook {
        playbook: String,
        #[serde(default)]
        vars: BTreeMap<String, String>,
    },
    /// Run a script looked up in the per-target script catalog.
    DynamicScripts { script: String },
}

fn default_stop_playbook() -> String {
    DEFAULT_STOP_PLAYBOOK.to_string()
}

impl ActionKind {
    /// Return the wire-format name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script { .. } => "script",
            Self::ScriptStop { .. } => "script_stop",
            Self::Playbook { .. } => "playbook",
            Self::DynamicScripts { .. } => "dynamic_scripts",
        }
    }

    /// Script name recorded on the job, for the kinds that have one.
    pub fn script_name(&self) -> Option<&str> {
        match self {
            Self::Script { script, .. } | Self::DynamicScripts { script } => Some(script),
            Self::ScriptStop { .. } | Self::Playbook { .. } => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// What kind of entity a job targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Service,
    Server,
}

// ---------------------------------------------------------------------------
// Input schema
// ---------------------------------------------------------------------------

/// One declared input of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_input_type() -> String {
    "string".to_string()
}

impl InputSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_type: default_input_type(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
}

/// A resolved script: where it lives and what inputs it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub path: PathBuf,
    pub inputs: Vec<InputSpec>,
}

/// Names of required inputs that are absent, null or empty.
pub fn missing_required_inputs(schema: &[InputSpec], inputs: &Map<String, Value>) -> Vec<String> {
    schema
        .iter()
        .filter(|spec| spec.required)
        .filter(|spec| match inputs.get(&spec.name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|spec| spec.name.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Environment and substitution
// ---------------------------------------------------------------------------

/// Render a JSON value as a command-line / environment string.
///
/// Strings are used verbatim, `null` becomes empty, everything else uses its
/// JSON representation.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build `INPUT_<NAME>` environment pairs from request inputs.
///
/// `INPUT_USERNAME` is filled from the requester unless the caller supplied
/// a `username` input themselves.
pub fn build_input_env(
    inputs: &Map<String, Value>,
    requester: Option<&Requester>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = inputs
        .iter()
        .map(|(name, value)| {
            (
                format!("{INPUT_ENV_PREFIX}{}", name.to_uppercase()),
                render_value(value),
            )
        })
        .collect();

    let has_username = inputs
        .keys()
        .any(|name| name.eq_ignore_ascii_case(USERNAME_INPUT));
    if let (false, Some(requester)) = (has_username, requester) {
        env.push((
            format!("{INPUT_ENV_PREFIX}{}", USERNAME_INPUT.to_uppercase()),
            requester.display_name.clone(),
        ));
    }
    env
}

/// Replace `{{ field }}` placeholders with values from `subject`.
///
/// Unknown fields are left as literal text.
pub fn substitute_placeholders(template: &str, subject: &Map<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match subject.get(&caps[1]) {
                Some(value) => render_value(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Render a playbook's declared variables into `(key, value)` pairs.
pub fn resolve_playbook_vars(
    vars: &BTreeMap<String, String>,
    subject: &Map<String, Value>,
) -> Vec<(String, String)> {
    vars.iter()
        .map(|(key, template)| (key.clone(), substitute_placeholders(template, subject)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
