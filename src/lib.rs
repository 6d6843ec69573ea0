//! Workflow orchestration for named agents
//!
//! A workflow is a set of named steps with dependencies. The
//! [`WorkflowEngine`](workflow::WorkflowEngine) validates the dependency
//! graph, then runs every step whose dependencies are satisfied, up to a
//! concurrency limit, with per-step retry and timeouts. Steps delegate to
//! registered [`Agent`](agent::Agent)s, branch on conditions, group nested
//! steps, or run custom [`StepExecutor`](workflow::StepExecutor)s.

pub mod agent;
pub mod cli;
pub mod condition;
pub mod config;
pub mod logging;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentBuilder, AgentError, CustomAgent};
pub use config::{EngineConfig, StepConfig, StepType, WorkflowConfig, WorkflowSettings};
pub use task::{Task, TaskResult};
pub use workflow::{WorkflowBuilder, WorkflowContext, WorkflowEngine, WorkflowError, WorkflowStatus};
