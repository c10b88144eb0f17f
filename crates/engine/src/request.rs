//! Caller-facing request types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use opsdeck_core::actions::{ActionKind, TargetKind};
use opsdeck_core::job::Requester;

/// A request to run one action against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub target: String,
    pub action: String,
    pub definition: ActionKind,
    #[serde(default)]
    pub target_kind: TargetKind,
    /// Caller-supplied parameters, exported to scripts as `INPUT_*`.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Data about the target used for `{{ field }}` playbook substitution.
    #[serde(default)]
    pub subject: Map<String, Value>,
    #[serde(default)]
    pub requested_by: Option<Requester>,
}

impl JobRequest {
    pub fn new(
        target: impl Into<String>,
        action: impl Into<String>,
        definition: ActionKind,
    ) -> Self {
        Self {
            target: target.into(),
            action: action.into(),
            definition,
            target_kind: TargetKind::default(),
            inputs: Map::new(),
            subject: Map::new(),
            requested_by: None,
        }
    }

    pub fn with_target_kind(mut self, target_kind: TargetKind) -> Self {
        self.target_kind = target_kind;
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_subject(mut self, subject: Map<String, Value>) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requested_by = Some(requester);
        self
    }
}

/// A request to run the same action against several targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    /// Per-target action, e.g. `stop`. The parent job records `bulk_<action>`.
    pub action: String,
    pub definition: ActionKind,
    pub targets: Vec<String>,
    #[serde(default)]
    pub target_kind: TargetKind,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub subject: Map<String, Value>,
    #[serde(default)]
    pub requested_by: Option<Requester>,
}

impl BulkRequest {
    pub fn new(action: impl Into<String>, definition: ActionKind, targets: Vec<String>) -> Self {
        Self {
            action: action.into(),
            definition,
            targets,
            target_kind: TargetKind::default(),
            inputs: Map::new(),
            subject: Map::new(),
            requested_by: None,
        }
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requested_by = Some(requester);
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Action recorded on the parent job.
    pub fn bulk_action(&self) -> String {
        format!("bulk_{}", self.action)
    }

    /// Target label recorded on the parent job.
    pub fn bulk_target(&self) -> String {
        format!("bulk ({} services)", self.targets.len())
    }

    /// The single-target request run for one child.
    pub fn child_request(&self, target: &str) -> JobRequest {
        JobRequest {
            target: target.to_string(),
            action: self.action.clone(),
            definition: self.definition.clone(),
            target_kind: self.target_kind,
            inputs: self.inputs.clone(),
            subject: self.subject.clone(),
            requested_by: self.requested_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let request: JobRequest = serde_json::from_value(json!({
            "target": "svc1",
            "action": "deploy",
            "definition": { "kind": "script", "script": "deploy" }
        }))
        .expect("valid request");

        assert_eq!(request.target_kind, TargetKind::Service);
        assert!(request.inputs.is_empty());
        assert_matches!(
            request.definition,
            ActionKind::Script { ref script, .. } if script == "deploy"
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = serde_json::from_value::<JobRequest>(json!({
            "target": "svc1",
            "action": "deploy",
            "definition": { "kind": "teleport" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn bulk_labels_and_children() {
        let bulk = BulkRequest::new(
            "stop",
            ActionKind::ScriptStop {
                playbook: "stop.yml".into(),
            },
            vec!["a".into(), "b".into(), "c".into()],
        );
        assert_eq!(bulk.bulk_action(), "bulk_stop");
        assert_eq!(bulk.bulk_target(), "bulk (3 services)");

        let child = bulk.child_request("b");
        assert_eq!(child.target, "b");
        assert_eq!(child.action, "stop");
    }
}
