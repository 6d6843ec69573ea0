//! Retry policy and the per-step attempt loop

use super::context::ContextView;
use super::executor::{Dispatcher, StepError};
use crate::config::{RetryConfig, StepConfig, WorkflowSettings};
use crate::task::TaskResult;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on any single retry delay
const MAX_DELAY: Duration = Duration::from_secs(300);

/// How often, and how patiently, a step is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied after each failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: clamp_delay(config.delay_seconds),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_delay: MAX_DELAY,
            jitter: config.jitter,
        }
    }

    /// Policy for a top-level step
    ///
    /// An explicit `retry` block wins. Otherwise the engine defaults apply
    /// when automatic retry is on, and a single attempt when it is off.
    pub fn resolve(step: &StepConfig, settings: &WorkflowSettings) -> Self {
        match step.retry {
            Some(ref config) => Self::from_config(config),
            None if settings.auto_retry_failed_steps => Self {
                max_attempts: settings.default_max_attempts.max(1),
                initial_delay: clamp_delay(settings.retry_delay_seconds),
                ..Self::default()
            },
            None => Self::none(),
        }
    }

    /// Delay after the given failed attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            capped_delay + rand::random::<f64>() * 0.25 * capped_delay
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay).unwrap_or(self.max_delay)
    }
}

/// Configured retry delay, with bad values pinned to zero or [`MAX_DELAY`]
fn clamp_delay(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(seconds).map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run a step until it succeeds, fails permanently, or runs out of attempts
///
/// Each attempt gets its own `timeout`. Panics inside an attempt become
/// [`StepError::Panicked`]. Returns the last outcome and the number of
/// attempts made.
pub(crate) async fn run_with_policy(
    step: &StepConfig,
    policy: &RetryPolicy,
    timeout: Option<Duration>,
    dispatcher: &Dispatcher,
    view: Arc<ContextView>,
) -> (Result<TaskResult, StepError>, u32) {
    let mut attempt = 0;

    loop {
        attempt += 1;
        let run = AssertUnwindSafe(dispatcher.dispatch(step, Arc::clone(&view))).catch_unwind();

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Ok(Err(StepError::Timeout {
                    step: step.name.clone(),
                    timeout: limit,
                })),
            },
            None => run.await,
        };

        let outcome = outcome.unwrap_or_else(|payload| {
            Err(StepError::Panicked {
                step: step.name.clone(),
                message: panic_message(payload.as_ref()),
            })
        });

        match outcome {
            Ok(result) => {
                debug!(step = %step.name, attempt, "step attempt succeeded");
                return (Ok(result), attempt);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    step = %step.name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "step attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
