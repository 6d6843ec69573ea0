//! Workflow-level errors

use thiserror::Error;

/// Errors that stop a workflow from running (or abort it)
///
/// Ordinary step failures are not errors at this level; they are recorded
/// in the run's context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("duplicate step name '{step}'")]
    DuplicateStep { step: String },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("circular dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("invalid workflow definition: {}", errors.join("; "))]
    InvalidDefinition { errors: Vec<String> },

    #[error("internal error: {message}")]
    Internal { message: String },
}
