//! Configurable agent with action handlers and private memory

use super::{Agent, AgentError, AgentStatus};
use crate::config::AgentConfig;
use crate::task::{Task, builtin_task, run_task};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Capabilities every custom agent starts with
pub const DEFAULT_CAPABILITIES: &[&str] = &["general_processing", "task_execution"];

/// Async function handling one named action
pub type ActionHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, AgentError>> + Send + Sync>;

/// Agent-private memory
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    /// Latest values by key (e.g. `last_thoughts`)
    pub short_term: Map<String, Value>,
    /// Every action the agent has executed, in order
    pub long_term: Vec<Value>,
    /// Accumulated request context
    pub context: Map<String, Value>,
    /// Failed actions
    pub error_log: Vec<Value>,
    /// Successfully processed requests
    pub completed: u64,
}

/// General-purpose agent
///
/// A request with an `action` field is routed to the handler registered for
/// that action; unknown actions are acknowledged without side effects. Any
/// other request is echoed back with the agent's reasoning record.
///
/// Memory sits behind an async mutex held for the whole of `process`, so
/// concurrent requests to the same agent run one at a time.
pub struct CustomAgent {
    name: String,
    description: String,
    capabilities: BTreeSet<String>,
    config: Map<String, Value>,
    handlers: HashMap<String, ActionHandler>,
    memory: Mutex<AgentMemory>,
    status: AtomicU8,
}

impl CustomAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            config: Map::new(),
            handlers: HashMap::new(),
            memory: Mutex::new(AgentMemory::default()),
            status: AtomicU8::new(AgentStatus::Idle as u8),
        }
    }

    /// Build an agent from configuration, mounting built-in tasks named in `actions`
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let mut builder = AgentBuilder::new(&config.name)
            .with_description(&config.description)
            .with_capabilities(config.capabilities.iter().cloned())
            .with_config(config.settings.clone());

        for action in &config.actions {
            let task = builtin_task(action).ok_or_else(|| AgentError::Unsupported {
                agent: config.name.clone(),
                capability: action.clone(),
            })?;
            builder = builder.with_shared_task(action.clone(), task);
        }

        Ok(builder.build())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Actions with a registered handler, sorted
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Snapshot of the agent's memory
    pub async fn memory(&self) -> AgentMemory {
        self.memory.lock().await.clone()
    }

    /// Summary of state, capabilities and memory usage
    pub async fn status_report(&self) -> Value {
        let memory = self.memory.lock().await;
        json!({
            "name": self.name,
            "state": self.status().to_string(),
            "capabilities": self.capabilities,
            "actions": self.actions(),
            "completed_tasks": memory.completed,
            "errors": memory.error_log.len(),
            "memory_size": {
                "short_term": memory.short_term.len(),
                "long_term": memory.long_term.len(),
                "context": memory.context.len(),
            },
        })
    }

    fn set_status(&self, status: AgentStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    async fn act(&self, action: &str, parameters: Map<String, Value>) -> Result<Value, AgentError> {
        debug!(agent = %self.name, action, "executing action");
        match self.handlers.get(action) {
            Some(handler) => handler(parameters).await,
            None => Ok(json!({
                "action": action,
                "parameters": parameters,
                "executed": true,
            })),
        }
    }
}

/// Parameters handed to an action handler
fn action_parameters(input: &Map<String, Value>) -> Map<String, Value> {
    match input.get("parameters") {
        Some(Value::Object(params)) => params.clone(),
        _ => {
            let mut params = input.clone();
            params.remove("action");
            params
        }
    }
}

#[async_trait]
impl Agent for CustomAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    fn can_handle(&self, capability: &str) -> bool {
        self.capabilities.contains(capability) || self.capabilities.contains("general_processing")
    }

    fn status(&self) -> AgentStatus {
        match self.status.load(Ordering::SeqCst) {
            1 => AgentStatus::Busy,
            2 => AgentStatus::Error,
            _ => AgentStatus::Idle,
        }
    }

    async fn process(&self, input: Value) -> Result<Value, AgentError> {
        let mut memory = self.memory.lock().await;
        let _busy = BusyGuard::enter(&self.status);

        let thoughts = json!({
            "context": {"input": input},
            "capabilities": self.capabilities,
            "state": "thinking",
        });
        memory.context.insert("input".into(), input.clone());
        memory.short_term.insert("last_thoughts".into(), thoughts.clone());

        let action = input
            .as_object()
            .and_then(|obj| obj.get("action").and_then(Value::as_str).map(|a| (a, obj)));

        let outcome = match action {
            Some((action, obj)) => {
                let parameters = action_parameters(obj);
                memory.long_term.push(json!({
                    "action": action,
                    "parameters": parameters,
                }));
                let result = self.act(action, parameters.clone()).await;
                if let Err(ref e) = result {
                    memory.error_log.push(json!({
                        "action": action,
                        "parameters": parameters,
                        "error": e.to_string(),
                    }));
                }
                result
            }
            None => Ok(json!({
                "processed_input": input,
                "thoughts": thoughts,
                "agent": self.name,
            })),
        };

        match outcome {
            Ok(_) => {
                memory.completed += 1;
                self.set_status(AgentStatus::Idle);
            }
            Err(ref e) => {
                error!(agent = %self.name, error = %e, "agent processing failed");
                self.set_status(AgentStatus::Error);
            }
        }

        outcome
    }
}

/// Marks an agent busy for the life of one `process` call
///
/// If the call is dropped before it settles (a step timeout), the agent
/// goes back to idle instead of staying busy.
struct BusyGuard<'a>(&'a AtomicU8);

impl<'a> BusyGuard<'a> {
    fn enter(status: &'a AtomicU8) -> Self {
        status.store(AgentStatus::Busy as u8, Ordering::SeqCst);
        Self(status)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let _ = self.0.compare_exchange(
            AgentStatus::Busy as u8,
            AgentStatus::Idle as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Fluent construction of a [`CustomAgent`]
pub struct AgentBuilder {
    agent: CustomAgent,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent: CustomAgent::new(name),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.agent.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.agent.capabilities.insert(capability.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent
            .capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.agent.config.extend(config);
        self
    }

    /// Register an async handler for `action`
    pub fn with_action_handler<F, Fut>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        let action = action.into();
        info!(agent = %self.agent.name, action = %action, "registered action handler");
        let boxed: ActionHandler = Arc::new(
            move |params| -> BoxFuture<'static, Result<Value, AgentError>> {
                Box::pin(handler(params))
            },
        );
        self.agent.handlers.insert(action, boxed);
        self
    }

    /// Handle `action` by running a task; the task's `data` becomes the response
    pub fn with_task(self, action: impl Into<String>, task: impl Task + 'static) -> Self {
        self.with_shared_task(action, Arc::new(task))
    }

    pub fn with_shared_task(self, action: impl Into<String>, task: Arc<dyn Task>) -> Self {
        let agent = self.agent.name.clone();
        self.with_action_handler(action, move |params| {
            let task = Arc::clone(&task);
            let agent = agent.clone();
            async move {
                let result = run_task(task.as_ref(), &params).await;
                if result.success {
                    Ok(result.data)
                } else {
                    Err(AgentError::InvalidInput {
                        agent,
                        message: result.error.unwrap_or_else(|| "task failed".to_string()),
                    })
                }
            }
        })
    }

    pub fn build(self) -> CustomAgent {
        info!(
            agent = %self.agent.name,
            capabilities = ?self.agent.capabilities,
            "initialized agent"
        );
        self.agent
    }
}

/// Create a custom agent with extra capabilities
pub fn create_agent<I, S>(name: impl Into<String>, capabilities: I) -> CustomAgent
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AgentBuilder::new(name).with_capabilities(capabilities).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DataProcessingTask;

    #[test]
    fn test_default_capabilities() {
        let agent = create_agent("worker", ["analysis"]);
        assert!(agent.capabilities().contains("general_processing"));
        assert!(agent.capabilities().contains("task_execution"));
        assert!(agent.capabilities().contains("analysis"));
        // general_processing accepts anything
        assert!(agent.can_handle("astrology"));
    }

    #[tokio::test]
    async fn test_default_processing_echoes_input() {
        let agent = CustomAgent::new("echo");
        let out = agent.process(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out["processed_input"], json!({"text": "hi"}));
        assert_eq!(out["agent"], "echo");
        assert_eq!(out["thoughts"]["context"]["input"]["text"], "hi");

        let memory = agent.memory().await;
        assert_eq!(memory.completed, 1);
        assert!(memory.short_term.contains_key("last_thoughts"));
        assert!(memory.long_term.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_acknowledged() {
        let agent = CustomAgent::new("a");
        let out = agent
            .process(json!({"action": "wave", "parameters": {"hand": "left"}}))
            .await
            .unwrap();
        assert_eq!(out, json!({"action": "wave", "parameters": {"hand": "left"}, "executed": true}));
        assert_eq!(agent.memory().await.long_term.len(), 1);
    }

    #[tokio::test]
    async fn test_action_handler() {
        let agent = AgentBuilder::new("math")
            .with_action_handler("double", |params| async move {
                let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
                Ok::<_, AgentError>(json!(n * 2))
            })
            .build();

        // parameters may be nested or inline
        assert_eq!(
            agent.process(json!({"action": "double", "parameters": {"n": 4}})).await.unwrap(),
            json!(8)
        );
        assert_eq!(agent.process(json!({"action": "double", "n": 5})).await.unwrap(), json!(10));
        assert_eq!(agent.actions(), vec!["double"]);
    }

    #[tokio::test]
    async fn test_dropped_call_leaves_agent_idle() {
        let agent = AgentBuilder::new("sleepy")
            .with_action_handler("nap", |_| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, AgentError>(Value::Null)
            })
            .build();

        let call = agent.process(json!({"action": "nap"}));
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), call).await;
        assert!(timed_out.is_err());
        assert_eq!(agent.status(), AgentStatus::Idle);

        // the next call still gets the memory lock
        assert!(agent.process(json!({"text": "again"})).await.is_ok());
        assert_eq!(agent.status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_handler_error_logged() {
        let agent = AgentBuilder::new("flaky")
            .with_action_handler("fail", |_| async { Err::<Value, _>(AgentError::failed("flaky", "nope")) })
            .build();

        let err = agent.process(json!({"action": "fail"})).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(agent.status(), AgentStatus::Error);

        let report = agent.status_report().await;
        assert_eq!(report["errors"], 1);
        assert_eq!(report["completed_tasks"], 0);
        assert_eq!(report["state"], "error");
    }

    #[tokio::test]
    async fn test_task_handler() {
        let agent = AgentBuilder::new("processor")
            .with_task("process", DataProcessingTask::new())
            .build();

        let out = agent
            .process(json!({
                "action": "process",
                "parameters": {"data": [3, 1, 2], "operations": ["sort"]}
            }))
            .await
            .unwrap();
        assert_eq!(out, json!([1, 2, 3]));

        let err = agent
            .process(json!({"action": "process", "parameters": {}}))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = AgentConfig {
            name: "analyst".into(),
            capabilities: vec!["analysis".into()],
            actions: vec!["analysis".into()],
            ..Default::default()
        };
        let agent = CustomAgent::from_config(&config).unwrap();
        assert!(agent.capabilities().contains("analysis"));

        let out = agent
            .process(json!({"action": "analysis", "data": [1, 2, 3], "analysis_type": "statistical"}))
            .await
            .unwrap();
        assert_eq!(out["mean"], 2.0);

        let bad = AgentConfig {
            name: "x".into(),
            actions: vec!["teleport".into()],
            ..Default::default()
        };
        assert!(matches!(
            CustomAgent::from_config(&bad),
            Err(AgentError::Unsupported { .. })
        ));
    }
}
