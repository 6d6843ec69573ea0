//! Shared state of a single workflow run

use super::error::WorkflowError;
use super::executor::StepError;
use super::state::{SkipReason, StepExecution, StepStatus};
use crate::task::TaskResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one workflow run
pub type RunId = Uuid;

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    /// Every step succeeded or was skipped by its own guard
    Completed,
    /// A critical step failed or the run timed out
    Failed,
    /// At least one non-critical step failed
    PartiallyFailed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::PartiallyFailed
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::PartiallyFailed => "partially_failed",
        };
        f.write_str(s)
    }
}

/// What a log entry records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Step {
        step: String,
        status: StepStatus,
        attempt: u32,
    },
    Workflow {
        status: WorkflowStatus,
    },
}

/// One status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub event: LogEvent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Read-only snapshot handed to running steps
///
/// Taken when a step is dispatched, so it holds every result of the
/// step's dependencies. Serializes to the shape predicates are evaluated
/// against: `{run_id, workflow, data, steps}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextView {
    pub run_id: RunId,
    pub workflow: String,
    pub data: Map<String, Value>,
    pub steps: BTreeMap<String, StepExecution>,
}

impl ContextView {
    pub fn step_result(&self, step: &str) -> Option<&TaskResult> {
        self.steps.get(step).and_then(|s| s.result.as_ref())
    }

    /// Copy of this view with an extra successful step result
    ///
    /// Used by sequential groups so later nested steps see earlier ones.
    pub fn with_result(&self, step: &str, result: &TaskResult) -> Self {
        let mut view = self.clone();
        view.steps.insert(
            step.to_string(),
            StepExecution {
                status: StepStatus::Succeeded,
                attempts: 1,
                result: Some(result.clone()),
                ..Default::default()
            },
        );
        view
    }
}

/// State of one run: step records, shared data and the status log
///
/// The scheduler is the only writer; everything else reads snapshots or
/// the finished context.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowContext {
    run_id: RunId,
    workflow: String,
    status: WorkflowStatus,
    data: Map<String, Value>,
    steps: BTreeMap<String, StepExecution>,
    log: Vec<LogEntry>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WorkflowContext {
    /// Create a pending context seeded with a copy of the caller's data
    pub fn new(workflow: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow: workflow.into(),
            status: WorkflowStatus::Pending,
            data,
            steps: BTreeMap::new(),
            log: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn steps(&self) -> &BTreeMap<String, StepExecution> {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.get(name)
    }

    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.steps.get(name).map(|s| s.status)
    }

    pub fn step_result(&self, name: &str) -> Option<&TaskResult> {
        self.steps.get(name).and_then(|s| s.result.as_ref())
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Reason the run failed, if it did
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn counts(&self) -> StepCounts {
        let mut counts = StepCounts {
            total: self.steps.len(),
            ..Default::default()
        };
        for exec in self.steps.values() {
            match exec.status {
                StepStatus::Pending | StepStatus::Ready => counts.pending += 1,
                StepStatus::Running => counts.running += 1,
                StepStatus::Succeeded => counts.succeeded += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Snapshot for a running step
    pub fn view(&self) -> ContextView {
        ContextView {
            run_id: self.run_id,
            workflow: self.workflow.clone(),
            data: self.data.clone(),
            steps: self.steps.clone(),
        }
    }

    /// Move to Running with every step Pending
    pub(crate) fn start<'a>(&mut self, steps: impl IntoIterator<Item = &'a str>) {
        self.steps = steps
            .into_iter()
            .map(|name| (name.to_string(), StepExecution::default()))
            .collect();
        self.started_at = Some(Utc::now());
        self.set_status(WorkflowStatus::Running, None);
    }

    /// Record the final status
    pub(crate) fn finish(&mut self, status: WorkflowStatus, error: Option<String>) {
        self.completed_at = Some(Utc::now());
        self.error = error.clone();
        self.set_status(status, error);
    }

    pub(crate) fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    fn set_status(&mut self, status: WorkflowStatus, error: Option<String>) {
        self.status = status;
        self.push_log(LogEvent::Workflow { status }, error);
    }

    fn push_log(&mut self, event: LogEvent, error: Option<String>) {
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            event,
            error,
        });
    }

    fn transition(&mut self, name: &str, status: StepStatus, error: Option<String>) {
        let Some(exec) = self.steps.get_mut(name) else {
            return;
        };
        exec.status = status;
        let attempt = exec.attempts;
        self.push_log(
            LogEvent::Step {
                step: name.to_string(),
                status,
                attempt,
            },
            error,
        );
    }

    pub(crate) fn mark_ready(&mut self, name: &str) {
        self.transition(name, StepStatus::Ready, None);
    }

    pub(crate) fn mark_running(&mut self, name: &str) {
        if let Some(exec) = self.steps.get_mut(name) {
            exec.started_at = Some(Utc::now());
        }
        self.transition(name, StepStatus::Running, None);
    }

    /// Skip a step that has not finished
    pub(crate) fn skip_step(&mut self, name: &str, reason: SkipReason) {
        let Some(exec) = self.steps.get_mut(name) else {
            return;
        };
        if exec.status.is_terminal() {
            return;
        }
        exec.finished_at = Some(Utc::now());
        exec.skip_reason = Some(reason);
        self.transition(name, StepStatus::Skipped, None);
    }

    /// Record the terminal outcome of a step
    ///
    /// A step's outcome is written once; recording it again is an internal
    /// error.
    pub(crate) fn finish_step(
        &mut self,
        name: &str,
        outcome: Result<TaskResult, StepError>,
        attempts: u32,
    ) -> Result<(), WorkflowError> {
        let exec = self.steps.get_mut(name).ok_or_else(|| WorkflowError::Internal {
            message: format!("no execution record for step '{}'", name),
        })?;
        if exec.status.is_terminal() {
            return Err(WorkflowError::Internal {
                message: format!("step '{}' already finished as {}", name, exec.status),
            });
        }

        let now = Utc::now();
        exec.attempts = attempts;
        exec.finished_at = Some(now);
        exec.duration_ms = exec
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);

        let (status, error) = match outcome {
            Ok(result) => {
                exec.result = Some(result);
                (StepStatus::Succeeded, None)
            }
            Err(e) => {
                let message = e.to_string();
                exec.result = Some(
                    TaskResult::failure(message.clone()).with_metadata("attempts", attempts),
                );
                exec.error = Some(message.clone());
                (StepStatus::Failed, Some(message))
            }
        };
        self.transition(name, status, error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running(steps: &[&str]) -> WorkflowContext {
        let data = json!({"seed": 1}).as_object().cloned().unwrap();
        let mut ctx = WorkflowContext::new("test", data);
        ctx.start(steps.iter().copied());
        ctx
    }

    #[test]
    fn test_start() {
        let ctx = running(&["a", "b"]);
        assert_eq!(ctx.status(), WorkflowStatus::Running);
        assert_eq!(ctx.get_data("seed"), Some(&json!(1)));
        assert_eq!(ctx.counts().pending, 2);
        assert!(ctx.started_at().is_some());
        assert!(matches!(
            ctx.log()[0].event,
            LogEvent::Workflow {
                status: WorkflowStatus::Running
            }
        ));
    }

    #[test]
    fn test_finish_step_once() {
        let mut ctx = running(&["a"]);
        ctx.mark_running("a");
        ctx.finish_step("a", Ok(TaskResult::success("out")), 2).unwrap();

        let exec = ctx.step("a").unwrap();
        assert_eq!(exec.status, StepStatus::Succeeded);
        assert_eq!(exec.attempts, 2);
        assert!(exec.finished_at >= exec.started_at);
        assert_eq!(ctx.step_result("a").unwrap().data, json!("out"));

        let err = ctx
            .finish_step("a", Ok(TaskResult::success("again")), 3)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Internal { .. }));
        assert_eq!(ctx.step_result("a").unwrap().data, json!("out"));
    }

    #[test]
    fn test_failed_step_logged_with_error() {
        let mut ctx = running(&["a"]);
        ctx.mark_running("a");
        ctx.finish_step("a", Err(StepError::Custom("bad input".into())), 1)
            .unwrap();

        let last = ctx.log().last().unwrap();
        assert_eq!(last.error.as_deref(), Some("bad input"));
        assert_eq!(
            last.event,
            LogEvent::Step {
                step: "a".into(),
                status: StepStatus::Failed,
                attempt: 1
            }
        );
        assert_eq!(ctx.counts().failed, 1);

        let result = ctx.step_result("a").unwrap();
        assert!(!result.success);
        assert_eq!(result.data, Value::Null);
        assert_eq!(result.error.as_deref(), Some("bad input"));
        assert_eq!(result.metadata["attempts"], 1);
        assert_eq!(ctx.step("a").unwrap().error.as_deref(), Some("bad input"));
    }

    #[test]
    fn test_log_entry_json() {
        let mut ctx = running(&["a"]);
        ctx.mark_ready("a");
        let entry = serde_json::to_value(ctx.log().last().unwrap()).unwrap();
        assert_eq!(entry["kind"], "step");
        assert_eq!(entry["step"], "a");
        assert_eq!(entry["status"], "ready");
        assert!(entry.get("error").is_none());
    }

    #[test]
    fn test_view_with_result() {
        let ctx = running(&["a"]);
        let view = ctx.view().with_result("nested", &TaskResult::success(5));
        assert_eq!(view.step_result("nested").unwrap().data, json!(5));
        assert!(ctx.step("nested").is_none());
    }
}
