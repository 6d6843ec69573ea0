//! Workflow and step configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Whether `seconds` is a non-negative, finite span that fits in a [`Duration`]
pub fn is_valid_seconds(seconds: f64) -> bool {
    Duration::try_from_secs_f64(seconds).is_ok()
}

/// Whether `seconds` is usable as a timeout
pub fn is_valid_timeout(seconds: f64) -> bool {
    seconds > 0.0 && is_valid_seconds(seconds)
}

/// Step type - explicit, not inferred
///
/// Names that don't match a built-in type become [`StepType::Custom`] and are
/// dispatched to whatever executor was registered under that name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    /// Delegate to a registered agent
    #[default]
    AgentTask,
    /// Evaluate a predicate and run the `if` or `else` branch
    Conditional,
    /// Run nested steps one after another
    Sequential,
    /// Run nested steps concurrently
    Parallel,
    /// Sleep for `parameters.seconds`
    Delay,
    /// Externally registered executor
    Custom(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            StepType::AgentTask => "agent_task",
            StepType::Conditional => "conditional",
            StepType::Sequential => "sequential",
            StepType::Parallel => "parallel",
            StepType::Delay => "delay",
            StepType::Custom(name) => name,
        }
    }
}

impl From<&str> for StepType {
    fn from(name: &str) -> Self {
        match name {
            "agent_task" => StepType::AgentTask,
            "conditional" => StepType::Conditional,
            "sequential" => StepType::Sequential,
            "parallel" => StepType::Parallel,
            "delay" => StepType::Delay,
            other => StepType::Custom(other.to_string()),
        }
    }
}

impl From<String> for StepType {
    fn from(name: String) -> Self {
        StepType::from(name.as_str())
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        step_type.as_str().to_string()
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry settings for a single step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,

    /// Multiplier applied to the delay after every failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_seconds() -> f64 {
    1.0
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Configuration for a workflow step
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// Step name (unique within workflow)
    pub name: String,

    /// Step type
    #[serde(default, alias = "type")]
    pub step_type: StepType,

    /// Structured parameters handed to the agent or executor
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Steps this step depends on
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,

    /// Agent to run (for agent_task steps)
    pub agent_name: Option<String>,

    /// Capability the agent must have; picks an agent when `agent_name` is absent
    pub capability: Option<String>,

    /// Retry policy; falls back to the engine defaults when absent
    pub retry: Option<RetryConfig>,

    /// Per-attempt timeout in seconds
    pub timeout_seconds: Option<f64>,

    /// A failure of this step fails the whole workflow
    #[serde(default)]
    pub critical: bool,

    /// Run even when a dependency failed
    #[serde(default)]
    pub run_always: bool,

    /// Guard expression; the step is skipped when it evaluates to false
    pub when: Option<String>,

    /// Predicate (for conditional steps)
    pub condition: Option<String>,

    /// Branch taken when the predicate holds
    #[serde(rename = "if")]
    pub then_step: Option<Box<StepConfig>>,

    /// Branch taken otherwise
    #[serde(rename = "else")]
    pub else_step: Option<Box<StepConfig>>,

    /// Nested steps (for sequential and parallel groups)
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl StepConfig {
    /// Create a step of the given type
    pub fn new(name: impl Into<String>, step_type: impl Into<StepType>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            ..Default::default()
        }
    }

    /// Step that delegates to a named agent
    pub fn agent_task(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent.into()),
            ..Self::new(name, StepType::AgentTask)
        }
    }

    /// Step that branches on a predicate
    pub fn conditional(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::new(name, StepType::Conditional)
        }
    }

    /// Group whose steps run one after another
    pub fn sequential(name: impl Into<String>, steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            ..Self::new(name, StepType::Sequential)
        }
    }

    /// Group whose steps run concurrently
    pub fn parallel(name: impl Into<String>, steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            ..Self::new(name, StepType::Parallel)
        }
    }

    /// Step that waits
    pub fn delay(name: impl Into<String>, seconds: f64) -> Self {
        Self::new(name, StepType::Delay).with_parameter("seconds", seconds)
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_seconds: f64) -> Self {
        self.retry = Some(RetryConfig {
            max_attempts,
            delay_seconds,
            ..Default::default()
        });
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn run_always(mut self) -> Self {
        self.run_always = true;
        self
    }

    pub fn when(mut self, expr: impl Into<String>) -> Self {
        self.when = Some(expr.into());
        self
    }

    pub fn then(mut self, step: StepConfig) -> Self {
        self.then_step = Some(Box::new(step));
        self
    }

    pub fn otherwise(mut self, step: StepConfig) -> Self {
        self.else_step = Some(Box::new(step));
        self
    }

    /// Shared-data key the step's output is stored under, if any
    pub fn store_result_as(&self) -> Option<&str> {
        self.parameters.get("store_result_as").and_then(Value::as_str)
    }

    /// Check the fields each step type requires, recursing into branches and groups
    fn check_fields(&self, path: &str, errors: &mut Vec<String>) {
        if self.name.trim().is_empty() {
            errors.push(format!("{} has an empty name", path));
        }

        for (label, expr) in [("when", &self.when), ("condition", &self.condition)] {
            if let Some(expr) = expr {
                if let Err(e) = crate::condition::validate_expression(expr) {
                    errors.push(format!("step '{}' has invalid '{}': {}", self.name, label, e));
                }
            }
        }

        match &self.step_type {
            StepType::AgentTask => {
                if self.agent_name.is_none() && self.capability.is_none() {
                    errors.push(format!(
                        "agent_task step '{}' needs 'agent_name' or 'capability'",
                        self.name
                    ));
                }
            }
            StepType::Conditional => {
                if self.condition.is_none() {
                    errors.push(format!(
                        "conditional step '{}' missing 'condition' field",
                        self.name
                    ));
                }
                for branch in [&self.then_step, &self.else_step].into_iter().flatten() {
                    branch.check_fields(&format!("{}/{}", path, branch.name), errors);
                }
            }
            StepType::Sequential | StepType::Parallel => {
                if self.steps.is_empty() {
                    errors.push(format!(
                        "{} step '{}' has no nested steps",
                        self.step_type, self.name
                    ));
                }
                for nested in &self.steps {
                    nested.check_fields(&format!("{}/{}", path, nested.name), errors);
                }
            }
            StepType::Delay => {
                if let Some(seconds) = self.parameters.get("seconds") {
                    if !seconds.as_f64().is_some_and(is_valid_seconds) {
                        errors.push(format!(
                            "delay step '{}' needs a finite, non-negative 'seconds' parameter",
                            self.name
                        ));
                    }
                }
            }
            StepType::Custom(_) => {}
        }

        if let Some(ref retry) = self.retry {
            if retry.max_attempts == 0 {
                errors.push(format!("step '{}' has retry.max_attempts = 0", self.name));
            }
            if !is_valid_seconds(retry.delay_seconds)
                || !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0)
            {
                errors.push(format!(
                    "step '{}' needs a finite, non-negative retry delay and a finite backoff multiplier of at least 1",
                    self.name
                ));
            }
        }

        if let Some(timeout) = self.timeout_seconds {
            if !is_valid_timeout(timeout) {
                errors.push(format!(
                    "step '{}' has an invalid timeout {} (must be positive and finite)",
                    self.name, timeout
                ));
            }
        }
    }
}

/// Full workflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Workflow-level timeout in seconds
    pub timeout_seconds: Option<f64>,

    /// Steps in this workflow
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>, steps: Vec<StepConfig>) -> Self {
        Self {
            name: name.into(),
            steps,
            ..Default::default()
        }
    }

    /// Look up a top-level step by name
    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check per-step field requirements
    ///
    /// Graph structure (duplicates, dangling references, cycles) is checked
    /// separately by the engine before a run starts.
    pub fn check_steps(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("workflow has an empty name".to_string());
        }
        if let Some(timeout) = self.timeout_seconds {
            if !is_valid_timeout(timeout) {
                errors.push(format!(
                    "workflow has an invalid timeout {} (must be positive and finite)",
                    timeout
                ));
            }
        }

        for step in &self.steps {
            step.check_fields(&step.name, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_names() {
        assert_eq!(StepType::from("agent_task"), StepType::AgentTask);
        assert_eq!(StepType::from("delay"), StepType::Delay);
        assert_eq!(
            StepType::from("data_processing"),
            StepType::Custom("data_processing".into())
        );
        assert_eq!(StepType::Conditional.to_string(), "conditional");
        assert_eq!(String::from(StepType::Custom("x".into())), "x");
    }

    #[test]
    fn test_step_config_json() {
        let json = r#"{
            "name": "analyze",
            "step_type": "agent_task",
            "agent_name": "analyzer",
            "parameters": {"action": "summarize"},
            "dependencies": ["fetch"],
            "retry": {"max_attempts": 5, "delay_seconds": 0.5}
        }"#;
        let step: StepConfig = serde_json::from_str(json).unwrap();
        assert_eq!(step.step_type, StepType::AgentTask);
        assert_eq!(step.agent_name.as_deref(), Some("analyzer"));
        assert_eq!(step.dependencies, vec!["fetch"]);
        let retry = step.retry.unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff_multiplier, 1.0);
    }

    #[test]
    fn test_conditional_toml() {
        let toml = r#"
            name = "route"
            step_type = "conditional"
            condition = "data.score > 5"
            depends_on = ["score"]

            [if]
            name = "celebrate"
            agent_name = "notifier"

            [else]
            name = "retry_later"
            step_type = "delay"
            parameters = { seconds = 0.1 }
        "#;
        let step: StepConfig = toml::from_str(toml).unwrap();
        assert_eq!(step.step_type, StepType::Conditional);
        assert_eq!(step.dependencies, vec!["score"]);
        assert_eq!(step.then_step.as_ref().unwrap().name, "celebrate");
        assert_eq!(step.else_step.as_ref().unwrap().step_type, StepType::Delay);
    }

    #[test]
    fn test_custom_type_roundtrips_as_string() {
        let step = StepConfig::new("ingest", "data_processing");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step_type"], "data_processing");
    }

    #[test]
    fn test_store_result_as() {
        let step = StepConfig::agent_task("a", "agent").with_parameter("store_result_as", "summary");
        assert_eq!(step.store_result_as(), Some("summary"));
        assert_eq!(StepConfig::agent_task("b", "agent").store_result_as(), None);
    }

    #[test]
    fn test_check_steps() {
        let workflow = WorkflowConfig::new(
            "test",
            vec![
                StepConfig::agent_task("good", "worker"),
                StepConfig::new("no_agent", StepType::AgentTask),
                StepConfig::new("no_condition", StepType::Conditional),
                StepConfig::sequential("empty_group", vec![]),
                StepConfig::delay("bad_delay", -1.0),
                StepConfig::agent_task("bad_retry", "worker").with_retry(0, 0.0),
                StepConfig::agent_task("bad_guard", "worker").when("data.x =="),
            ],
        );

        let errors = workflow.check_steps().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("no_agent")));
        assert!(errors.iter().any(|e| e.contains("no_condition")));
        assert!(errors.iter().any(|e| e.contains("empty_group")));
        assert!(errors.iter().any(|e| e.contains("bad_delay")));
        assert!(errors.iter().any(|e| e.contains("bad_retry")));
        assert!(errors.iter().any(|e| e.contains("bad_guard")));
        assert!(!errors.iter().any(|e| e.contains("'good'")));
    }

    #[test]
    fn test_check_rejects_unrepresentable_durations() {
        let mut workflow = WorkflowConfig::new(
            "huge",
            vec![
                StepConfig::agent_task("huge_timeout", "worker").with_timeout(1e300),
                StepConfig::agent_task("nan_timeout", "worker").with_timeout(f64::NAN),
                StepConfig::agent_task("huge_retry", "worker").with_retry(2, f64::INFINITY),
                StepConfig::delay("huge_delay", 1e300),
                StepConfig::sequential(
                    "group",
                    vec![StepConfig::agent_task("nested_timeout", "worker").with_timeout(f64::MAX)],
                ),
            ],
        );
        workflow.timeout_seconds = Some(-5.0);

        let errors = workflow.check_steps().unwrap_err();
        for name in ["huge_timeout", "nan_timeout", "huge_retry", "huge_delay", "nested_timeout"] {
            assert!(errors.iter().any(|e| e.contains(name)), "no error for {}", name);
        }
        assert!(errors.iter().any(|e| e.starts_with("workflow has an invalid timeout")));

        workflow.timeout_seconds = Some(f64::INFINITY);
        workflow.steps = vec![StepConfig::agent_task("ok", "worker").with_timeout(0.5)];
        assert_eq!(workflow.check_steps().unwrap_err().len(), 1);

        workflow.timeout_seconds = Some(30.0);
        assert!(workflow.check_steps().is_ok());
    }

    #[test]
    fn test_valid_seconds() {
        assert!(is_valid_seconds(0.0));
        assert!(is_valid_seconds(2.5));
        assert!(!is_valid_seconds(-0.1));
        assert!(!is_valid_seconds(f64::NAN));
        assert!(!is_valid_seconds(f64::INFINITY));
        assert!(!is_valid_seconds(1e300));
        assert!(!is_valid_timeout(0.0));
        assert!(is_valid_timeout(0.01));
    }

    #[test]
    fn test_check_nested_branches() {
        let workflow = WorkflowConfig::new(
            "nested",
            vec![
                StepConfig::conditional("route", "true")
                    .then(StepConfig::new("missing_agent", StepType::AgentTask)),
            ],
        );
        let errors = workflow.check_steps().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("missing_agent")));
    }
}
