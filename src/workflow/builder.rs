//! Fluent workflow construction

use super::error::WorkflowError;
use super::graph::validate_workflow;
use crate::config::{StepConfig, WorkflowConfig};
use serde_json::{Map, Value};

/// Builds a [`WorkflowConfig`] step by step; `build` validates the result
#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    workflow: WorkflowConfig,
}

/// Start building a workflow
pub fn create_workflow(name: impl Into<String>) -> WorkflowBuilder {
    WorkflowBuilder::new(name)
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: WorkflowConfig::new(name, Vec::new()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.workflow.description = description.into();
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.workflow.timeout_seconds = Some(seconds);
        self
    }

    pub fn add_step(mut self, step: StepConfig) -> Self {
        self.workflow.steps.push(step);
        self
    }

    pub fn add_agent_task(
        self,
        name: &str,
        agent: &str,
        parameters: Map<String, Value>,
        dependencies: &[&str],
    ) -> Self {
        self.add_step(
            StepConfig::agent_task(name, agent)
                .with_parameters(parameters)
                .depends_on(dependencies.iter().copied()),
        )
    }

    pub fn add_delay(self, name: &str, seconds: f64, dependencies: &[&str]) -> Self {
        self.add_step(StepConfig::delay(name, seconds).depends_on(dependencies.iter().copied()))
    }

    pub fn add_conditional(
        self,
        name: &str,
        condition: &str,
        then_step: Option<StepConfig>,
        else_step: Option<StepConfig>,
        dependencies: &[&str],
    ) -> Self {
        let mut step = StepConfig::conditional(name, condition).depends_on(dependencies.iter().copied());
        step.then_step = then_step.map(Box::new);
        step.else_step = else_step.map(Box::new);
        self.add_step(step)
    }

    /// Validate and return the workflow
    pub fn build(self) -> Result<WorkflowConfig, WorkflowError> {
        validate_workflow(&self.workflow)?;
        Ok(self.workflow)
    }
}

/// Chain of agent tasks for one agent, each depending on the previous
///
/// Each task object becomes the step's parameters; its `name` (if any)
/// names the step, otherwise steps are `task_0`, `task_1`, ...
pub fn simple_agent_workflow(
    name: &str,
    agent: &str,
    tasks: Vec<Map<String, Value>>,
) -> Result<WorkflowConfig, WorkflowError> {
    let mut builder =
        WorkflowBuilder::new(name).description(format!("Sequential workflow for {}", agent));
    let mut previous: Option<String> = None;

    for (i, mut task) in tasks.into_iter().enumerate() {
        let step_name = match task.remove("name") {
            Some(Value::String(s)) => s,
            _ => format!("task_{}", i),
        };

        let mut step = StepConfig::agent_task(&step_name, agent).with_parameters(task);
        if let Some(prev) = previous.replace(step_name) {
            step = step.depends_on([prev]);
        }
        builder = builder.add_step(step);
    }

    builder.build()
}
