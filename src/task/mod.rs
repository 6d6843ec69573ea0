//! Tasks: self-contained units of work
//!
//! A task takes a parameter object and returns a [`TaskResult`]. Tasks reach a
//! workflow either as a custom step type (through [`TaskExecutor`]) or as an
//! action handler on a [`CustomAgent`](crate::agent::CustomAgent).

mod analysis;
mod communication;
mod data;
mod decision;
mod executor;
mod types;

pub use analysis::AnalysisTask;
pub use communication::CommunicationTask;
pub use data::DataProcessingTask;
pub use decision::DecisionTask;
pub use executor::TaskExecutor;
pub use types::{Task, TaskResult, run_task};

use std::sync::Arc;

/// Names of the built-in tasks, which double as their step types
pub const BUILTIN_TASKS: &[&str] = &["data_processing", "analysis", "decision", "communication"];

/// Look up a built-in task by name
pub fn builtin_task(name: &str) -> Option<Arc<dyn Task>> {
    let task: Arc<dyn Task> = match name {
        "data_processing" => Arc::new(DataProcessingTask::new()),
        "analysis" => Arc::new(AnalysisTask::new()),
        "decision" => Arc::new(DecisionTask::new()),
        "communication" => Arc::new(CommunicationTask::new()),
        _ => return None,
    };
    Some(task)
}

/// The built-in tasks as step executors, keyed by step type
pub fn builtin_executors() -> Vec<(&'static str, TaskExecutor)> {
    BUILTIN_TASKS
        .iter()
        .filter_map(|name| builtin_task(name).map(|task| (*name, TaskExecutor::shared(task))))
        .collect()
}
