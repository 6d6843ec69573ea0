//! Configuration types and loading for agentflow

mod agent;
mod loader;
mod workflow;

pub use agent::AgentConfig;
pub use loader::{EngineConfig, LoggingConfig, WorkflowSettings, load_workflow};
pub use workflow::{
    RetryConfig, StepConfig, StepType, WorkflowConfig, is_valid_seconds, is_valid_timeout,
};
