//! Agent definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// An agent declared in configuration
///
/// Configured agents are built as [`CustomAgent`](crate::agent::CustomAgent)s.
/// Each entry in `actions` names a built-in task mounted as an action handler.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Built-in tasks handled as actions (`data_processing`, `analysis`, ...)
    #[serde(default)]
    pub actions: Vec<String>,

    /// Free-form settings passed through to the agent
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Preset for a common role
    ///
    /// Known roles are `data_processor`, `coordinator`, `analyzer` and
    /// `communicator`. Anything else yields a bare `<role>_agent`.
    pub fn for_role(role: &str) -> Self {
        let (description, capabilities, actions, settings): (&str, &[&str], &[&str], Value) =
            match role {
                "data_processor" => (
                    "Transforms and validates data",
                    &["data_processing", "analysis", "transformation"],
                    &["data_processing", "analysis"],
                    json!({"max_concurrent_tasks": 3, "timeout_seconds": 60.0}),
                ),
                "coordinator" => (
                    "Coordinates tasks and makes routing decisions",
                    &["workflow_management", "task_coordination", "communication"],
                    &["decision", "communication"],
                    json!({"max_concurrent_tasks": 10, "timeout_seconds": 30.0}),
                ),
                "analyzer" => (
                    "Produces analyses and reports",
                    &["analysis", "reporting", "insights"],
                    &["analysis"],
                    json!({"max_concurrent_tasks": 2, "timeout_seconds": 120.0}),
                ),
                "communicator" => (
                    "Sends messages and notifications",
                    &["communication", "notifications", "reporting"],
                    &["communication"],
                    json!({"max_concurrent_tasks": 5, "timeout_seconds": 15.0}),
                ),
                _ => return Self::new(format!("{}_agent", role)),
            };

        Self {
            name: format!("{}_agent", role),
            description: description.to_string(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            settings: settings.as_object().cloned().unwrap_or_default(),
        }
    }
}
