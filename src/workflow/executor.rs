//! Step dispatch: step types, executors and the built-in step kinds

use super::context::ContextView;
use super::retry::{RetryPolicy, run_with_policy};
use crate::agent::{AgentError, AgentRegistry, RegistryError};
use crate::condition::{ConditionError, evaluate_condition};
use crate::config::{StepConfig, StepType};
use crate::task::TaskResult;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that occur while executing a step
#[derive(Debug, Error)]
pub enum StepError {
    #[error("agent '{agent}' is not registered")]
    AgentNotFound { agent: String },

    #[error("no registered agent can handle '{capability}'")]
    NoCapableAgent { capability: String },

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("step '{step}' timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("step '{step}' is missing required field '{field}'")]
    MissingField { step: String, field: &'static str },

    #[error("no executor registered for step type '{step_type}'")]
    NoExecutor { step_type: String },

    #[error("task failed in step '{step}': {message}")]
    Task { step: String, message: String },

    #[error("nested step '{step}' failed: {source}")]
    SubStep {
        step: String,
        #[source]
        source: Box<StepError>,
    },

    #[error("step '{step}' has an invalid duration of {seconds} seconds")]
    InvalidDuration { step: String, seconds: f64 },

    #[error("step '{step}' panicked: {message}")]
    Panicked { step: String, message: String },

    #[error("{0}")]
    Custom(String),
}

impl StepError {
    /// Convert a step's configured seconds without panicking on bad values
    pub fn duration(step: &str, seconds: f64) -> Result<Duration, StepError> {
        Duration::try_from_secs_f64(seconds).map_err(|_| StepError::InvalidDuration {
            step: step.to_string(),
            seconds,
        })
    }

    /// Check if another attempt could succeed
    ///
    /// Configuration problems (missing agents, executors or fields, bad
    /// expressions) and panics are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::AgentNotFound { .. }
            | StepError::NoCapableAgent { .. }
            | StepError::MissingField { .. }
            | StepError::NoExecutor { .. }
            | StepError::Condition(_)
            | StepError::InvalidDuration { .. }
            | StepError::Panicked { .. } => false,
            StepError::Agent(e) => e.is_retryable(),
            StepError::SubStep { source, .. } => source.is_retryable(),
            StepError::Timeout { .. } | StepError::Task { .. } | StepError::Custom(_) => true,
        }
    }
}

/// Executes steps of one type
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError>;
}

/// What a running step can see and do
#[derive(Clone)]
pub struct StepContext {
    view: Arc<ContextView>,
    dispatcher: Dispatcher,
}

impl StepContext {
    /// Snapshot of the run taken when the step was dispatched
    pub fn view(&self) -> &ContextView {
        &self.view
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.dispatcher.agents
    }

    /// Run a nested step (a branch or group member) through normal dispatch
    ///
    /// Honors the nested step's `when` guard, `retry` and `timeout_seconds`.
    /// A step skipped by its guard yields a null result marked `skipped`.
    pub async fn run_nested(&self, step: &StepConfig) -> Result<TaskResult, StepError> {
        self.run_nested_with(Arc::clone(&self.view), step).await
    }

    async fn run_nested_with(
        &self,
        view: Arc<ContextView>,
        step: &StepConfig,
    ) -> Result<TaskResult, StepError> {
        if let Some(ref guard) = step.when {
            if !evaluate_condition(guard, view.as_ref())? {
                debug!(step = %step.name, "nested step skipped by guard");
                return Ok(TaskResult::success(Value::Null).with_metadata("skipped", true));
            }
        }

        let policy = step
            .retry
            .as_ref()
            .map(RetryPolicy::from_config)
            .unwrap_or_else(RetryPolicy::none);
        let timeout = step
            .timeout_seconds
            .map(|seconds| StepError::duration(&step.name, seconds))
            .transpose()?;

        let (outcome, _attempts) = run_with_policy(step, &policy, timeout, &self.dispatcher, view).await;
        outcome.map_err(|e| StepError::SubStep {
            step: step.name.clone(),
            source: Box::new(e),
        })
    }
}

/// Routes a step to the executor registered for its type
#[derive(Clone)]
pub struct Dispatcher {
    agents: Arc<AgentRegistry>,
    executors: Arc<ExecutorRegistry>,
}

impl Dispatcher {
    pub fn new(agents: Arc<AgentRegistry>, executors: Arc<ExecutorRegistry>) -> Self {
        Self { agents, executors }
    }

    /// Execute one attempt of a step
    pub fn dispatch<'a>(
        &'a self,
        step: &'a StepConfig,
        view: Arc<ContextView>,
    ) -> BoxFuture<'a, Result<TaskResult, StepError>> {
        async move {
            let executor =
                self.executors
                    .get(&step.step_type)
                    .ok_or_else(|| StepError::NoExecutor {
                        step_type: step.step_type.to_string(),
                    })?;

            debug!(step = %step.name, step_type = %step.step_type, "dispatching step");
            let ctx = StepContext {
                view,
                dispatcher: self.clone(),
            };
            executor.execute(step, &ctx).await
        }
        .boxed()
    }
}

/// Step type → executor table
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry, without even the built-in step types
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in step type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.replace(StepType::AgentTask, Arc::new(AgentTaskExecutor));
        registry.replace(StepType::Conditional, Arc::new(ConditionalExecutor));
        registry.replace(StepType::Sequential, Arc::new(SequentialExecutor));
        registry.replace(StepType::Parallel, Arc::new(ParallelExecutor));
        registry.replace(StepType::Delay, Arc::new(DelayExecutor));
        registry
    }

    pub fn register(
        &mut self,
        step_type: StepType,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<(), RegistryError> {
        if self.executors.contains_key(&step_type) {
            return Err(RegistryError::DuplicateExecutor {
                step_type: step_type.to_string(),
            });
        }
        self.executors.insert(step_type, executor);
        Ok(())
    }

    /// Register or overwrite; returns the executor that was replaced
    pub fn replace(
        &mut self,
        step_type: StepType,
        executor: Arc<dyn StepExecutor>,
    ) -> Option<Arc<dyn StepExecutor>> {
        self.executors.insert(step_type, executor)
    }

    pub fn get(&self, step_type: &StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &StepType) -> bool {
        self.executors.contains_key(step_type)
    }

    /// Registered step type names, sorted
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().map(StepType::to_string).collect();
        types.sort();
        types
    }
}

/// Executor backed by an async closure
struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepConfig, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskResult, StepError>> + Send + 'static,
{
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        (self.f)(step.clone(), ctx.clone()).await
    }
}

/// Wrap an async closure as a step executor
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn StepExecutor>
where
    F: Fn(StepConfig, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskResult, StepError>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

/// Delegates to an agent chosen by name or capability
///
/// The request is the run's shared data overlaid with the step parameters.
struct AgentTaskExecutor;

#[async_trait]
impl StepExecutor for AgentTaskExecutor {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        let agents = ctx.agents();
        let agent = match (&step.agent_name, &step.capability) {
            (Some(name), _) => agents.get(name).ok_or_else(|| StepError::AgentNotFound {
                agent: name.clone(),
            })?,
            (None, Some(capability)) => {
                agents
                    .find_capable(capability)
                    .ok_or_else(|| StepError::NoCapableAgent {
                        capability: capability.clone(),
                    })?
            }
            (None, None) => {
                return Err(StepError::MissingField {
                    step: step.name.clone(),
                    field: "agent_name",
                });
            }
        };

        if let Some(ref capability) = step.capability {
            if !agent.can_handle(capability) {
                return Err(AgentError::Unsupported {
                    agent: agent.name().to_string(),
                    capability: capability.clone(),
                }
                .into());
            }
        }

        let mut request = ctx.view().data.clone();
        request.extend(step.parameters.clone());
        request.remove("store_result_as");

        debug!(step = %step.name, agent = agent.name(), "sending request to agent");
        let output = agent.process(Value::Object(request)).await?;

        Ok(TaskResult::success(output).with_metadata("agent", agent.name()))
    }
}

/// Runs the `if` branch when the condition holds, else the `else` branch
struct ConditionalExecutor;

#[async_trait]
impl StepExecutor for ConditionalExecutor {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        let condition = step.condition.as_deref().ok_or_else(|| StepError::MissingField {
            step: step.name.clone(),
            field: "condition",
        })?;

        let holds = evaluate_condition(condition, ctx.view())?;
        let (label, branch) = if holds {
            ("if", step.then_step.as_deref())
        } else {
            ("else", step.else_step.as_deref())
        };
        debug!(step = %step.name, condition, result = holds, "evaluated condition");

        let result = match branch {
            Some(branch) => {
                let mut result = ctx.run_nested(branch).await?;
                result
                    .metadata
                    .insert("branch_step".into(), branch.name.clone().into());
                result
            }
            None => TaskResult::success(Value::Null),
        };

        Ok(result
            .with_metadata("condition", condition)
            .with_metadata("condition_result", holds)
            .with_metadata("branch", if branch.is_some() { label } else { "none" }))
    }
}

/// Runs nested steps in order, stopping at the first failure
///
/// Later nested steps see the results of earlier ones under `steps.<name>`.
struct SequentialExecutor;

#[async_trait]
impl StepExecutor for SequentialExecutor {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        let mut view = Arc::clone(&ctx.view);
        let mut outputs = Map::new();

        for nested in &step.steps {
            let result = ctx.run_nested_with(Arc::clone(&view), nested).await?;
            view = Arc::new(view.with_result(&nested.name, &result));
            outputs.insert(nested.name.clone(), result.data);
        }

        Ok(TaskResult::success(Value::Object(outputs))
            .with_metadata("completed_steps", step.steps.len()))
    }
}

/// Runs nested steps concurrently; fails if any of them fails
struct ParallelExecutor;

#[async_trait]
impl StepExecutor for ParallelExecutor {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        let results = join_all(step.steps.iter().map(|nested| ctx.run_nested(nested))).await;

        let mut outputs = Map::new();
        let mut first_error = None;
        let mut failed = 0usize;

        for (nested, result) in step.steps.iter().zip(results) {
            match result {
                Ok(result) => {
                    outputs.insert(nested.name.clone(), result.data);
                }
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(TaskResult::success(Value::Object(outputs))
                .with_metadata("completed_steps", step.steps.len() - failed)),
        }
    }
}

/// Sleeps for `parameters.seconds` (default 1.0)
struct DelayExecutor;

#[async_trait]
impl StepExecutor for DelayExecutor {
    async fn execute(&self, step: &StepConfig, _ctx: &StepContext) -> Result<TaskResult, StepError> {
        let seconds = step
            .parameters
            .get("seconds")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .max(0.0);

        tokio::time::sleep(StepError::duration(&step.name, seconds)?).await;
        Ok(TaskResult::success(json!({"delayed_seconds": seconds})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentBuilder, CustomAgent};

    fn dispatcher_with(agents: Vec<CustomAgent>) -> Dispatcher {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(Arc::new(agent)).unwrap();
        }
        Dispatcher::new(Arc::new(registry), Arc::new(ExecutorRegistry::with_builtins()))
    }

    fn view(data: Value) -> Arc<ContextView> {
        Arc::new(ContextView {
            workflow: "test".into(),
            data: data.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        })
    }

    fn doubler() -> CustomAgent {
        AgentBuilder::new("doubler")
            .with_action_handler("double", |params| async move {
                let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
                Ok::<_, AgentError>(json!(n * 2))
            })
            .build()
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!StepError::AgentNotFound { agent: "a".into() }.is_retryable());
        assert!(!StepError::NoExecutor { step_type: "x".into() }.is_retryable());
        assert!(StepError::Custom("flaky".into()).is_retryable());
        assert!(StepError::Agent(AgentError::failed("a", "x")).is_retryable());
        let nested = StepError::SubStep {
            step: "inner".into(),
            source: Box::new(StepError::AgentNotFound { agent: "a".into() }),
        };
        assert!(!nested.is_retryable());
        assert!(
            !StepError::InvalidDuration {
                step: "s".into(),
                seconds: f64::INFINITY
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_step_duration() {
        assert_eq!(StepError::duration("s", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(StepError::duration("s", -1.0).is_err());
        assert!(StepError::duration("s", 1e300).is_err());
    }

    #[test]
    fn test_registry_duplicates() {
        let mut registry = ExecutorRegistry::with_builtins();
        let err = registry
            .register(StepType::Delay, Arc::new(DelayExecutor))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateExecutor {
                step_type: "delay".into()
            }
        );
        assert!(registry.replace(StepType::Delay, Arc::new(DelayExecutor)).is_some());
        assert_eq!(
            registry.step_types(),
            vec!["agent_task", "conditional", "delay", "parallel", "sequential"]
        );
    }

    #[tokio::test]
    async fn test_agent_request_overlays_parameters() {
        let dispatcher = dispatcher_with(vec![doubler()]);
        let step = StepConfig::agent_task("d", "doubler")
            .with_parameter("action", "double")
            .with_parameter("store_result_as", "doubled");

        let result = dispatcher
            .dispatch(&step, view(json!({"n": 21})))
            .await
            .unwrap();
        assert_eq!(result.data, json!(42));
        assert_eq!(result.metadata["agent"], "doubler");

        // parameters win over shared data
        let step = step.with_parameter("n", 5);
        let result = dispatcher.dispatch(&step, view(json!({"n": 21}))).await.unwrap();
        assert_eq!(result.data, json!(10));
    }

    #[tokio::test]
    async fn test_agent_not_found() {
        let dispatcher = dispatcher_with(vec![]);
        let step = StepConfig::agent_task("d", "ghost");
        let err = dispatcher.dispatch(&step, view(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::AgentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_agent_by_capability() {
        let dispatcher = dispatcher_with(vec![CustomAgent::new("general")]);
        let step = StepConfig::new("s", StepType::AgentTask).with_capability("anything");
        let result = dispatcher.dispatch(&step, view(json!({"x": 1}))).await.unwrap();
        assert_eq!(result.metadata["agent"], "general");
        assert_eq!(result.data["processed_input"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_no_executor() {
        let dispatcher = dispatcher_with(vec![]);
        let step = StepConfig::new("s", "unregistered");
        let err = dispatcher.dispatch(&step, view(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::NoExecutor { .. }));
    }

    #[tokio::test]
    async fn test_conditional_branches() {
        let dispatcher = dispatcher_with(vec![doubler()]);
        let step = StepConfig::conditional("route", "data.n > 10")
            .then(StepConfig::agent_task("big", "doubler").with_parameter("action", "double"))
            .otherwise(StepConfig::delay("small", 0.0));

        let big = dispatcher.dispatch(&step, view(json!({"n": 11}))).await.unwrap();
        assert_eq!(big.data, json!(22));
        assert_eq!(big.metadata["branch"], "if");
        assert_eq!(big.metadata["branch_step"], "big");

        let small = dispatcher.dispatch(&step, view(json!({"n": 1}))).await.unwrap();
        assert_eq!(small.metadata["branch"], "else");
        assert_eq!(small.metadata["condition_result"], false);
    }

    #[tokio::test]
    async fn test_unrepresentable_durations_fail_the_step() {
        let dispatcher = dispatcher_with(vec![doubler()]);

        let delay = StepConfig::delay("forever", 1e300);
        let err = dispatcher.dispatch(&delay, view(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidDuration { ref step, .. } if step == "forever"));
        assert!(!err.is_retryable());

        let group = StepConfig::sequential(
            "group",
            vec![
                StepConfig::agent_task("inner", "doubler")
                    .with_parameter("action", "double")
                    .with_timeout(f64::MAX),
            ],
        );
        let err = dispatcher.dispatch(&group, view(json!({"n": 1}))).await.unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[tokio::test]
    async fn test_conditional_without_branch() {
        let dispatcher = dispatcher_with(vec![]);
        let step = StepConfig::conditional("route", "false");
        let result = dispatcher.dispatch(&step, view(json!({}))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data, Value::Null);
        assert_eq!(result.metadata["branch"], "none");
    }

    #[tokio::test]
    async fn test_sequential_sees_earlier_results() {
        let dispatcher = dispatcher_with(vec![doubler()]);
        let step = StepConfig::sequential(
            "group",
            vec![
                StepConfig::agent_task("first", "doubler").with_parameter("action", "double"),
                StepConfig::conditional("check", "steps.first.result.data == 8")
                    .then(StepConfig::delay("pause", 0.0)),
            ],
        );

        let result = dispatcher.dispatch(&step, view(json!({"n": 4}))).await.unwrap();
        assert_eq!(result.data["first"], json!(8));
        assert_eq!(result.data["check"], json!({"delayed_seconds": 0.0}));
    }

    #[tokio::test]
    async fn test_sequential_stops_at_failure() {
        let dispatcher = dispatcher_with(vec![doubler()]);
        let step = StepConfig::sequential(
            "group",
            vec![
                StepConfig::agent_task("missing", "ghost"),
                StepConfig::agent_task("never", "doubler"),
            ],
        );

        let err = dispatcher.dispatch(&step, view(json!({}))).await.unwrap_err();
        match err {
            StepError::SubStep { step, source } => {
                assert_eq!(step, "missing");
                assert!(matches!(*source, StepError::AgentNotFound { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel() {
        let dispatcher = dispatcher_with(vec![doubler()]);
        let ok = StepConfig::parallel(
            "fan",
            vec![
                StepConfig::agent_task("a", "doubler")
                    .with_parameter("action", "double")
                    .with_parameter("n", 1),
                StepConfig::agent_task("b", "doubler")
                    .with_parameter("action", "double")
                    .with_parameter("n", 2),
            ],
        );
        let result = dispatcher.dispatch(&ok, view(json!({}))).await.unwrap();
        assert_eq!(result.data, json!({"a": 2, "b": 4}));

        let failing = StepConfig::parallel(
            "fan",
            vec![StepConfig::delay("wait", 0.0), StepConfig::agent_task("x", "ghost")],
        );
        assert!(dispatcher.dispatch(&failing, view(json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_nested_guard_skips() {
        let dispatcher = dispatcher_with(vec![]);
        let step = StepConfig::sequential(
            "group",
            vec![StepConfig::agent_task("guarded", "ghost").when("data.enabled")],
        );
        let result = dispatcher.dispatch(&step, view(json!({}))).await.unwrap();
        assert_eq!(result.data["guarded"], Value::Null);
    }

    #[tokio::test]
    async fn test_executor_fn() {
        let mut executors = ExecutorRegistry::with_builtins();
        executors
            .register(
                StepType::from("echo"),
                executor_fn(|step, ctx| async move {
                    let seed = ctx.view().data.get("seed").cloned().unwrap_or(Value::Null);
                    Ok::<_, StepError>(TaskResult::success(json!({"step": step.name, "seed": seed})))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(AgentRegistry::new()), Arc::new(executors));

        let step = StepConfig::new("e", "echo");
        let result = dispatcher.dispatch(&step, view(json!({"seed": 7}))).await.unwrap();
        assert_eq!(result.data, json!({"step": "e", "seed": 7}));
    }

    #[tokio::test]
    async fn test_capability_mismatch_for_named_agent() {
        struct Narrow;

        #[async_trait]
        impl Agent for Narrow {
            fn name(&self) -> &str {
                "narrow"
            }
            fn capabilities(&self) -> &std::collections::BTreeSet<String> {
                static EMPTY: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
                &EMPTY
            }
            async fn process(&self, input: Value) -> Result<Value, AgentError> {
                Ok(input)
            }
        }

        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Narrow)).unwrap();
        let dispatcher =
            Dispatcher::new(Arc::new(registry), Arc::new(ExecutorRegistry::with_builtins()));

        let step = StepConfig::agent_task("s", "narrow").with_capability("billing");
        let err = dispatcher.dispatch(&step, view(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Agent(AgentError::Unsupported { .. })));
        assert!(!err.is_retryable());
    }
}
