//! Dispatch front door: turn inbound webhook payloads into runs.
//!
//! A `WebhookTrigger` names the workflow to start and how payload fields map
//! onto run arguments. The resulting `NewRun` is handed to a `RunLauncher`,
//! which the ledger implements by creating a pending run.

pub mod template;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::core::{Ledger, Result};
use crate::domain::{NewRun, WorkflowRun};

pub use template::{lookup_path, render_template};

/// Something that can enqueue a workflow run
#[async_trait]
pub trait RunLauncher: Send + Sync {
    async fn launch(&self, request: NewRun) -> Result<WorkflowRun>;
}

#[async_trait]
impl RunLauncher for Ledger {
    async fn launch(&self, request: NewRun) -> Result<WorkflowRun> {
        self.create_run(request).await
    }
}

/// A configured webhook that starts a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub name: String,
    pub workflow_definition_id: String,
    pub project_id: String,
    pub user_id: String,

    /// Template for the run's display name
    #[serde(default)]
    pub run_name: Option<String>,

    /// Template for the run's description
    #[serde(default)]
    pub description: Option<String>,

    /// Input name → template rendered against the payload
    #[serde(default)]
    pub arg_mapping: BTreeMap<String, String>,
}

impl WebhookTrigger {
    /// Build the run request for an inbound payload.
    ///
    /// Run arguments are `{run_name, description, payload, inputs}` where
    /// `inputs` holds the rendered `arg_mapping`.
    pub fn build_run(&self, payload: &Value) -> NewRun {
        let run_name = self
            .run_name
            .as_deref()
            .map(|t| render_template(t, payload))
            .unwrap_or_else(|| self.name.clone());
        let description = self
            .description
            .as_deref()
            .map(|t| render_template(t, payload))
            .unwrap_or_default();

        let inputs: Map<String, Value> = self
            .arg_mapping
            .iter()
            .map(|(input, template)| {
                (input.clone(), Value::String(render_template(template, payload)))
            })
            .collect();

        NewRun::new(&self.workflow_definition_id, &self.project_id, &self.user_id).with_args(json!({
            "run_name": run_name,
            "description": description,
            "payload": payload,
            "inputs": inputs,
        }))
    }
}

/// Fire `trigger` for `payload` through `launcher`
#[instrument(skip(launcher, trigger, payload), fields(trigger = %trigger.name))]
pub async fn dispatch(
    launcher: &dyn RunLauncher,
    trigger: &WebhookTrigger,
    payload: &Value,
) -> Result<WorkflowRun> {
    let run = launcher.launch(trigger.build_run(payload)).await?;
    info!(run_id = %run.id, "Webhook dispatched run");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> WebhookTrigger {
        WebhookTrigger {
            name: "on-push".to_string(),
            workflow_definition_id: "ci".to_string(),
            project_id: "p1".to_string(),
            user_id: "bot".to_string(),
            run_name: Some("Push to {{ref}}".to_string()),
            description: None,
            arg_mapping: [
                ("branch".to_string(), "{{ref}}".to_string()),
                ("commit".to_string(), "{{commits.0.id}}".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_build_run_maps_payload() {
        let payload = json!({"ref": "main", "commits": [{"id": "abc123"}]});
        let request = trigger().build_run(&payload);

        assert_eq!(request.workflow_definition_id, "ci");
        assert_eq!(request.project_id, "p1");
        assert_eq!(request.user_id, "bot");
        assert_eq!(request.args["run_name"], "Push to main");
        assert_eq!(request.args["description"], "");
        assert_eq!(request.args["payload"], payload);
        assert_eq!(request.args["inputs"]["branch"], "main");
        assert_eq!(request.args["inputs"]["commit"], "abc123");
    }

    #[test]
    fn test_run_name_defaults_to_trigger_name() {
        let mut trigger = trigger();
        trigger.run_name = None;
        let request = trigger.build_run(&json!({}));
        assert_eq!(request.args["run_name"], "on-push");
        assert_eq!(request.args["inputs"]["branch"], "");
    }

    #[test]
    fn test_trigger_from_yaml() {
        let yaml = r#"
name: nightly
workflow_definition_id: report
project_id: p1
user_id: scheduler
arg_mapping:
  date: "{{date}}"
"#;
        let trigger: WebhookTrigger = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(trigger.name, "nightly");
        assert!(trigger.run_name.is_none());
        assert_eq!(trigger.arg_mapping["date"], "{{date}}");
    }
}
