//! Workflow engine: registries, validation and run management

use super::context::{RunId, WorkflowContext};
use super::error::WorkflowError;
use super::executor::{Dispatcher, ExecutorRegistry, StepExecutor};
use super::graph::validate_workflow;
use super::runner::WorkflowRunner;
use super::runs::{RunStatus, RunTracker};
use crate::agent::{Agent, AgentRegistry, CustomAgent, RegistryError};
use crate::config::{EngineConfig, StepType, WorkflowConfig, WorkflowSettings};
use crate::task::builtin_executors;
use anyhow::Context;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Schedules workflows over registered agents and step executors
///
/// Registration takes `&mut self` and copies the registries on write, so a
/// run that is already in flight keeps the registries it started with.
pub struct WorkflowEngine {
    settings: WorkflowSettings,
    agents: Arc<AgentRegistry>,
    executors: Arc<ExecutorRegistry>,
    runs: RunTracker,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::with_settings(WorkflowSettings::default())
    }

    pub fn with_settings(settings: WorkflowSettings) -> Self {
        let runs = RunTracker::new(settings.keep_completed_runs);
        Self {
            settings,
            agents: Arc::new(AgentRegistry::new()),
            executors: Arc::new(ExecutorRegistry::with_builtins()),
            runs,
        }
    }

    /// Engine with configured settings, configured agents and the built-in tasks
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let mut engine = Self::with_settings(config.workflow.clone());
        engine.register_builtin_tasks()?;

        for agent_config in &config.agents {
            let agent = CustomAgent::from_config(agent_config)
                .with_context(|| format!("Failed to build agent '{}'", agent_config.name))?;
            engine.register_agent(Arc::new(agent))?;
        }

        Ok(engine)
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        Arc::make_mut(&mut self.agents).register(agent)?;
        info!(agent = %name, "registered agent");
        Ok(())
    }

    pub fn unregister_agent(&mut self, name: &str) -> Option<Arc<dyn Agent>> {
        Arc::make_mut(&mut self.agents).unregister(name)
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name)
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Register an executor for a new step type
    pub fn register_step_executor(
        &mut self,
        step_type: impl Into<StepType>,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<(), RegistryError> {
        let step_type = step_type.into();
        debug!(step_type = %step_type, "registering step executor");
        Arc::make_mut(&mut self.executors).register(step_type, executor)
    }

    /// Register or overwrite the executor for a step type, built-ins included
    pub fn replace_step_executor(
        &mut self,
        step_type: impl Into<StepType>,
        executor: Arc<dyn StepExecutor>,
    ) -> Option<Arc<dyn StepExecutor>> {
        Arc::make_mut(&mut self.executors).replace(step_type.into(), executor)
    }

    /// Make the built-in tasks available as step types of the same name
    pub fn register_builtin_tasks(&mut self) -> Result<(), RegistryError> {
        for (step_type, executor) in builtin_executors() {
            self.register_step_executor(step_type, Arc::new(executor))?;
        }
        Ok(())
    }

    pub fn step_types(&self) -> Vec<String> {
        self.executors.step_types()
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.agents), Arc::clone(&self.executors))
    }

    fn validate(&self, workflow: &WorkflowConfig) -> Result<(), WorkflowError> {
        let checked = self
            .settings
            .check()
            .map_err(|errors| WorkflowError::InvalidDefinition { errors })
            .and_then(|()| validate_workflow(workflow));

        match checked {
            Ok(order) => {
                debug!(workflow = %workflow.name, order = ?order, "workflow validated");
                Ok(())
            }
            Err(e) => {
                error!(workflow = %workflow.name, error = %e, "workflow validation failed");
                Err(e)
            }
        }
    }

    /// Validate and run a workflow to completion
    ///
    /// `data` seeds the run's shared data store (the caller's map is not
    /// touched). Step failures are reported through the returned context.
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowConfig,
        data: Map<String, Value>,
    ) -> Result<WorkflowContext, WorkflowError> {
        self.validate(workflow)?;

        let ctx = WorkflowContext::new(&workflow.name, data);
        WorkflowRunner::new(workflow, &self.settings, self.dispatcher())
            .with_tracker(self.runs.clone())
            .run(ctx)
            .await
    }

    /// Validate a workflow and run it in the background
    ///
    /// The run is visible to [`get_workflow_status`](Self::get_workflow_status)
    /// as soon as this returns.
    pub async fn submit_workflow(
        &self,
        workflow: WorkflowConfig,
        data: Map<String, Value>,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.validate(&workflow)?;

        let ctx = WorkflowContext::new(&workflow.name, data);
        let run_id = ctx.run_id();
        self.runs.update(&ctx).await;

        let settings = self.settings.clone();
        let dispatcher = self.dispatcher();
        let tracker = self.runs.clone();

        let handle = tokio::spawn(async move {
            WorkflowRunner::new(&workflow, &settings, dispatcher)
                .with_tracker(tracker)
                .run(ctx)
                .await
        });

        info!(run_id = %run_id, "submitted workflow");
        Ok(WorkflowRun { run_id, handle })
    }

    /// Live status of an active or recently completed run
    pub async fn get_workflow_status(&self, run_id: RunId) -> Option<RunStatus> {
        self.runs.get(run_id).await
    }

    /// All active runs, then recently completed ones
    pub async fn list_workflows(&self) -> Vec<RunStatus> {
        self.runs.list().await
    }
}

/// Handle to a workflow running in the background
pub struct WorkflowRun {
    pub run_id: RunId,
    handle: JoinHandle<Result<WorkflowContext, WorkflowError>>,
}

impl WorkflowRun {
    /// Wait for the run to finish
    pub async fn wait(self) -> Result<WorkflowContext, WorkflowError> {
        self.handle.await.map_err(|e| WorkflowError::Internal {
            message: format!("workflow task failed: {}", e),
        })?
    }

    /// Abort the background run
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
