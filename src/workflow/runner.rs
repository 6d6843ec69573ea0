//! Scheduler loop for a single run

use super::context::{WorkflowContext, WorkflowStatus};
use super::error::WorkflowError;
use super::executor::{Dispatcher, StepError};
use super::retry::{RetryPolicy, run_with_policy};
use super::runs::RunTracker;
use super::state::{Schedule, SkipReason, StepStatus};
use crate::condition::evaluate_condition;
use crate::config::{StepConfig, WorkflowConfig, WorkflowSettings};
use crate::task::TaskResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type StepOutcome = (String, Result<TaskResult, StepError>, u32);

/// Why a run stopped early
enum Abort {
    Critical(String),
    TimedOut(Duration),
}

/// Executes one workflow run to completion
///
/// The runner is the only writer of the run's context. Ready steps are
/// spawned onto a `JoinSet` with a snapshot of the context; their outcomes
/// come back to the loop, which records them and promotes dependents.
pub struct WorkflowRunner<'a> {
    workflow: &'a WorkflowConfig,
    settings: &'a WorkflowSettings,
    dispatcher: Dispatcher,
    tracker: Option<RunTracker>,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(
        workflow: &'a WorkflowConfig,
        settings: &'a WorkflowSettings,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            workflow,
            settings,
            dispatcher,
            tracker: None,
        }
    }

    /// Publish progress to a run tracker
    pub fn with_tracker(mut self, tracker: RunTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn concurrency_limit(&self) -> usize {
        if self.settings.enable_step_parallelization {
            self.settings.max_concurrent_steps.unwrap_or(usize::MAX).max(1)
        } else {
            1
        }
    }

    /// Workflow deadline; a zero engine default means none
    fn workflow_timeout(&self) -> Result<Option<Duration>, WorkflowError> {
        let seconds = self
            .workflow
            .timeout_seconds
            .unwrap_or(self.settings.workflow_timeout_seconds);
        if seconds == 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| WorkflowError::InvalidDefinition {
                errors: vec![format!(
                    "workflow timeout of {} seconds is not a valid duration",
                    seconds
                )],
            })
    }

    fn step_timeout(&self, step: &StepConfig) -> Result<Option<Duration>, StepError> {
        let seconds = step
            .timeout_seconds
            .unwrap_or(self.settings.step_timeout_seconds);
        if seconds == 0.0 {
            return Ok(None);
        }
        StepError::duration(&step.name, seconds).map(Some)
    }

    async fn publish(&self, ctx: &WorkflowContext) {
        if let Some(ref tracker) = self.tracker {
            tracker.update(ctx).await;
        }
    }

    /// Run the workflow against a fresh context
    ///
    /// The workflow must already be validated. Step failures end up in the
    /// returned context; only internal faults are errors.
    pub async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, WorkflowError> {
        let timeout = self.workflow_timeout()?;
        let schedule = Schedule::new(self.workflow);
        ctx.start(schedule.order().iter().map(String::as_str));
        self.publish(&ctx).await;

        info!(
            run_id = %ctx.run_id(),
            workflow = %self.workflow.name,
            steps = self.workflow.steps.len(),
            "starting workflow"
        );

        let limit = self.concurrency_limit();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut in_flight: JoinSet<StepOutcome> = JoinSet::new();
        let mut abort = None;

        'run: loop {
            for name in schedule.advance(&mut ctx) {
                debug!(step = %name, "skipped after upstream failure");
            }

            let ready: Vec<String> = schedule.ready(&ctx).map(String::from).collect();
            let mut progressed = false;

            for name in ready {
                if in_flight.len() >= limit {
                    break;
                }
                let Some(step) = self.workflow.step(&name) else {
                    return Err(WorkflowError::Internal {
                        message: format!("scheduled unknown step '{}'", name),
                    });
                };

                if let Some(ref guard) = step.when {
                    match evaluate_condition(guard, &ctx.view()) {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(step = %name, guard = %guard, "step skipped by condition");
                            ctx.skip_step(&name, SkipReason::Condition);
                            progressed = true;
                            continue;
                        }
                        Err(e) => {
                            error!(step = %name, error = %e, "failed to evaluate step guard");
                            ctx.mark_running(&name);
                            ctx.finish_step(&name, Err(e.into()), 0)?;
                            progressed = true;
                            if step.critical {
                                abort = Some(Abort::Critical(name));
                                break 'run;
                            }
                            continue;
                        }
                    }
                }

                let step_timeout = match self.step_timeout(step) {
                    Ok(step_timeout) => step_timeout,
                    Err(e) => {
                        error!(step = %name, error = %e, "invalid step timeout");
                        ctx.mark_running(&name);
                        ctx.finish_step(&name, Err(e), 0)?;
                        progressed = true;
                        if step.critical {
                            abort = Some(Abort::Critical(name));
                            break 'run;
                        }
                        continue;
                    }
                };
                self.launch(&mut in_flight, &mut ctx, step, step_timeout);
            }

            if progressed {
                self.publish(&ctx).await;
                continue;
            }

            if in_flight.is_empty() {
                if schedule.outstanding(&ctx).is_empty() {
                    break;
                }
                return Err(WorkflowError::Internal {
                    message: "scheduler stalled with steps outstanding".into(),
                });
            }

            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort = timeout.map(Abort::TimedOut);
                        break;
                    }
                },
                None => in_flight.join_next().await,
            };

            let Some(joined) = joined else {
                continue;
            };
            let (name, outcome, attempts) = joined.map_err(|e| WorkflowError::Internal {
                message: format!("step task failed: {}", e),
            })?;

            let failed_critical = outcome.is_err() && self.is_critical(&name);
            self.complete(&mut ctx, &name, outcome, attempts)?;
            self.publish(&ctx).await;

            if failed_critical {
                abort = Some(Abort::Critical(name));
                break;
            }
        }

        if let Some(ref reason) = abort {
            self.cancel(&mut ctx, &schedule, &mut in_flight, reason).await?;
        }

        let counts = ctx.counts();
        let (status, error) = match abort {
            Some(Abort::TimedOut(limit)) => (
                WorkflowStatus::Failed,
                Some(format!("workflow timed out after {:?}", limit)),
            ),
            Some(Abort::Critical(step)) => (
                WorkflowStatus::Failed,
                Some(format!("critical step '{}' failed", step)),
            ),
            None if counts.failed > 0 => (
                WorkflowStatus::PartiallyFailed,
                Some(format!("{} step(s) failed", counts.failed)),
            ),
            None => (WorkflowStatus::Completed, None),
        };

        ctx.finish(status, error);
        self.publish(&ctx).await;

        info!(
            run_id = %ctx.run_id(),
            workflow = %self.workflow.name,
            status = %status,
            succeeded = counts.succeeded,
            failed = counts.failed,
            skipped = counts.skipped,
            "workflow finished"
        );

        Ok(ctx)
    }

    fn is_critical(&self, name: &str) -> bool {
        self.workflow.step(name).is_some_and(|s| s.critical)
    }

    fn launch(
        &self,
        in_flight: &mut JoinSet<StepOutcome>,
        ctx: &mut WorkflowContext,
        step: &StepConfig,
        timeout: Option<Duration>,
    ) {
        ctx.mark_running(&step.name);

        let view = Arc::new(ctx.view());
        let policy = RetryPolicy::resolve(step, self.settings);
        let dispatcher = self.dispatcher.clone();
        let step = step.clone();

        debug!(step = %step.name, max_attempts = policy.max_attempts, "launching step");
        in_flight.spawn(async move {
            let (outcome, attempts) = run_with_policy(&step, &policy, timeout, &dispatcher, view).await;
            (step.name, outcome, attempts)
        });
    }

    fn complete(
        &self,
        ctx: &mut WorkflowContext,
        name: &str,
        outcome: Result<TaskResult, StepError>,
        attempts: u32,
    ) -> Result<(), WorkflowError> {
        match outcome {
            Ok(ref result) => {
                if let Some(key) = self.workflow.step(name).and_then(StepConfig::store_result_as) {
                    ctx.set_data(key, result.data.clone());
                }
                info!(step = %name, attempts, "step succeeded");
            }
            Err(ref e) => {
                error!(step = %name, attempts, error = %e, "step failed");
            }
        }
        ctx.finish_step(name, outcome, attempts)
    }

    /// Stop outstanding work after a critical failure or timeout
    ///
    /// Outcomes that arrive while draining are still recorded. Steps that
    /// never finished are failed on timeout and skipped on critical failure;
    /// steps that never started are skipped.
    async fn cancel(
        &self,
        ctx: &mut WorkflowContext,
        schedule: &Schedule,
        in_flight: &mut JoinSet<StepOutcome>,
        reason: &Abort,
    ) -> Result<(), WorkflowError> {
        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            if let Ok((name, outcome, attempts)) = joined {
                self.complete(ctx, &name, outcome, attempts)?;
            }
        }

        let running: Vec<String> = ctx
            .steps()
            .iter()
            .filter(|(_, exec)| exec.status == StepStatus::Running)
            .map(|(name, _)| name.clone())
            .collect();

        for name in running {
            match reason {
                Abort::TimedOut(limit) => {
                    warn!(step = %name, "step interrupted by workflow timeout");
                    let attempts = ctx.step(&name).map_or(1, |e| e.attempts.max(1));
                    ctx.finish_step(
                        &name,
                        Err(StepError::Timeout {
                            step: name.clone(),
                            timeout: *limit,
                        }),
                        attempts,
                    )?;
                }
                Abort::Critical(_) => ctx.skip_step(&name, SkipReason::Cancelled),
            }
        }

        for name in schedule.outstanding(ctx) {
            ctx.skip_step(&name, SkipReason::Cancelled);
        }
        Ok(())
    }
}
