//! Agents: named, capability-tagged workers
//!
//! The engine only sees the [`Agent`] trait. [`CustomAgent`] is the stock
//! implementation, configured with [`AgentBuilder`] or from an
//! [`AgentConfig`](crate::config::AgentConfig).

mod custom;
mod registry;

pub use custom::{ActionHandler, AgentBuilder, AgentMemory, CustomAgent, create_agent};
pub use registry::{AgentRegistry, RegistryError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors an agent reports from [`Agent::process`]
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Processing failed; worth another attempt
    #[error("agent '{agent}' failed: {message}")]
    Failed { agent: String, message: String },

    /// The request itself is malformed
    #[error("agent '{agent}' rejected input: {message}")]
    InvalidInput { agent: String, message: String },

    /// The agent cannot perform the requested action
    #[error("agent '{agent}' does not support '{capability}'")]
    Unsupported { agent: String, capability: String },
}

impl AgentError {
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Failed { .. })
    }
}

/// Coarse agent state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// A named executor the engine delegates agent_task steps to
///
/// Agents are registered once and shared across runs, so implementations
/// must guard their own internal state.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent name
    fn name(&self) -> &str;

    /// Capabilities this agent advertises
    fn capabilities(&self) -> &BTreeSet<String>;

    /// Whether this agent accepts work needing `capability`
    fn can_handle(&self, capability: &str) -> bool {
        self.capabilities().contains(capability)
    }

    fn status(&self) -> AgentStatus {
        AgentStatus::Idle
    }

    /// Process one request
    async fn process(&self, input: Value) -> Result<Value, AgentError>;
}
