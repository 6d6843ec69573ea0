//! Per-step execution state and readiness propagation

use super::context::WorkflowContext;
use crate::config::WorkflowConfig;
use crate::task::TaskResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Lifecycle of a step within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a step was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's `when` guard evaluated to false
    Condition,
    /// A dependency failed or was itself skipped because of a failure
    UpstreamFailed { dependency: String },
    /// The run was aborted before the step could start
    Cancelled,
}

impl SkipReason {
    /// Skips that count as a failure for dependents
    pub fn propagates(&self) -> bool {
        !matches!(self, SkipReason::Condition)
    }
}

/// Execution record for one step in one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub status: StepStatus,

    /// Attempts made, including the successful one
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StepExecution {
    /// Whether dependents of this step must be skipped
    pub fn blocks_dependents(&self) -> bool {
        match self.status {
            StepStatus::Failed => true,
            StepStatus::Skipped => self.skip_reason.as_ref().is_none_or(SkipReason::propagates),
            _ => false,
        }
    }
}

/// Dependency structure of a workflow, used to move steps from Pending to
/// Ready or Skipped
#[derive(Debug, Clone)]
pub struct Schedule {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    run_always: HashSet<String>,
}

impl Schedule {
    pub fn new(workflow: &WorkflowConfig) -> Self {
        Self {
            order: workflow.steps.iter().map(|s| s.name.clone()).collect(),
            dependencies: workflow
                .steps
                .iter()
                .map(|s| (s.name.clone(), s.dependencies.clone()))
                .collect(),
            run_always: workflow
                .steps
                .iter()
                .filter(|s| s.run_always)
                .map(|s| s.name.clone())
                .collect(),
        }
    }

    /// Step names in definition order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Promote and skip pending steps until nothing changes
    ///
    /// A pending step whose dependencies are all terminal becomes Ready, unless
    /// one of them blocks dependents, in which case it is Skipped (or Ready, for
    /// `run_always` steps). Returns the steps skipped in this call.
    pub fn advance(&self, ctx: &mut WorkflowContext) -> Vec<String> {
        let mut skipped = Vec::new();

        loop {
            let mut changed = false;

            for name in &self.order {
                if ctx.step_status(name) != Some(StepStatus::Pending) {
                    continue;
                }

                let deps = self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[]);
                let mut all_terminal = true;
                let mut blocker = None;

                for dep in deps {
                    match ctx.step(dep) {
                        Some(exec) if exec.status.is_terminal() => {
                            if blocker.is_none() && exec.blocks_dependents() {
                                blocker = Some(dep.clone());
                            }
                        }
                        _ => all_terminal = false,
                    }
                }

                if let Some(dependency) = blocker {
                    if !self.run_always.contains(name) {
                        ctx.skip_step(name, SkipReason::UpstreamFailed { dependency });
                        skipped.push(name.clone());
                        changed = true;
                        continue;
                    }
                }

                if all_terminal {
                    ctx.mark_ready(name);
                    changed = true;
                }
            }

            if !changed {
                return skipped;
            }
        }
    }

    /// Ready steps in definition order
    pub fn ready<'a>(&'a self, ctx: &'a WorkflowContext) -> impl Iterator<Item = &'a str> + 'a {
        self.order
            .iter()
            .filter(|name| ctx.step_status(name) == Some(StepStatus::Ready))
            .map(String::as_str)
    }

    /// Steps not yet terminal or running
    pub fn outstanding<'a>(&'a self, ctx: &'a WorkflowContext) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                matches!(
                    ctx.step_status(name),
                    Some(StepStatus::Pending | StepStatus::Ready)
                )
            })
            .cloned()
            .collect()
    }
}
