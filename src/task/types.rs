//! Core types and traits for task execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{error, info};

/// Outcome of a task, an agent call or a workflow step
///
/// Failures are data: a failed result carries `success = false` and an
/// `error` message rather than being an `Err`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskResult {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: data.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single unit of work
///
/// Tasks are stateless across invocations; everything they need arrives in
/// `params`.
#[async_trait]
pub trait Task: Send + Sync {
    /// Task name, used in logs and result metadata
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Execute the task
    async fn execute(&self, params: &Map<String, Value>) -> TaskResult;
}

/// Run a task with timing and logging
///
/// Adds `task` and `duration_ms` to the result metadata.
pub async fn run_task(task: &dyn Task, params: &Map<String, Value>) -> TaskResult {
    info!(task = task.name(), "starting task");
    let start = Instant::now();

    let result = task.execute(params).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    if result.success {
        info!(task = task.name(), duration_ms, "task completed");
    } else {
        error!(
            task = task.name(),
            duration_ms,
            error = result.error.as_deref().unwrap_or("unknown"),
            "task failed"
        );
    }

    result
        .with_metadata("task", task.name())
        .with_metadata("duration_ms", duration_ms)
}

/// Number of elements in a collection value, 1 for scalars
pub(crate) fn value_size(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        _ => 1,
    }
}

/// Name of the JSON type of a value
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// True when every key in `criteria` has an equal value in `item`
pub(crate) fn matches_criteria(item: &Map<String, Value>, criteria: &Map<String, Value>) -> bool {
    criteria
        .iter()
        .all(|(key, expected)| item.get(key).unwrap_or(&Value::Null) == expected)
}
