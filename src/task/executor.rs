//! Adapter that runs a [`Task`] as a custom workflow step

use super::types::{Task, TaskResult, run_task};
use crate::config::StepConfig;
use crate::workflow::{StepContext, StepError, StepExecutor};
use async_trait::async_trait;
use std::sync::Arc;

/// Step executor backed by a task
///
/// The task receives the run's shared data overlaid with the step
/// parameters. A result with `success = false` fails the step.
#[derive(Clone)]
pub struct TaskExecutor {
    task: Arc<dyn Task>,
}

impl TaskExecutor {
    pub fn new(task: impl Task + 'static) -> Self {
        Self::shared(Arc::new(task))
    }

    pub fn shared(task: Arc<dyn Task>) -> Self {
        Self { task }
    }

    pub fn task_name(&self) -> &str {
        self.task.name()
    }
}

#[async_trait]
impl StepExecutor for TaskExecutor {
    async fn execute(&self, step: &StepConfig, ctx: &StepContext) -> Result<TaskResult, StepError> {
        let mut params = ctx.view().data.clone();
        params.extend(step.parameters.clone());

        let result = run_task(self.task.as_ref(), &params).await;
        if result.success {
            Ok(result)
        } else {
            Err(StepError::Task {
                step: step.name.clone(),
                message: result.error.unwrap_or_else(|| "task failed".to_string()),
            })
        }
    }
}
