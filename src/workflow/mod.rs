//! Workflow orchestration
//!
//! This module handles:
//! - Structural validation (duplicates, dangling references, cycles)
//! - Dependency-ordered, concurrent step scheduling
//! - Dispatch to agents, predicates and registered step executors
//! - Retry, per-step and per-run timeouts
//! - Live run status
//!
//! # Example
//!
//! ```ignore
//! use agentflow::agent::CustomAgent;
//! use agentflow::config::StepConfig;
//! use agentflow::workflow::{WorkflowEngine, create_workflow};
//! use std::sync::Arc;
//!
//! let mut engine = WorkflowEngine::new();
//! engine.register_agent(Arc::new(CustomAgent::new("worker")))?;
//!
//! let workflow = create_workflow("demo")
//!     .add_step(StepConfig::agent_task("fetch", "worker"))
//!     .add_step(StepConfig::agent_task("report", "worker").depends_on(["fetch"]))
//!     .build()?;
//!
//! let ctx = engine.execute_workflow(&workflow, Default::default()).await?;
//! println!("{}", ctx.status());
//! ```

mod builder;
mod context;
mod engine;
mod error;
mod executor;
mod graph;
mod retry;
mod runner;
mod runs;
mod state;

pub use builder::{WorkflowBuilder, create_workflow, simple_agent_workflow};
pub use context::{
    ContextView, LogEntry, LogEvent, RunId, StepCounts, WorkflowContext, WorkflowStatus,
};
pub use engine::{WorkflowEngine, WorkflowRun};
pub use error::WorkflowError;
pub use executor::{
    Dispatcher, ExecutorRegistry, StepContext, StepError, StepExecutor, executor_fn,
};
pub use graph::{topological_sort, validate_workflow};
pub use retry::RetryPolicy;
pub use runner::WorkflowRunner;
pub use runs::{RunStatus, RunTracker};
pub use state::{Schedule, SkipReason, StepExecution, StepStatus};
