//! Name-keyed agent registry

use super::Agent;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Registration conflicts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent '{name}' is already registered")]
    DuplicateAgent { name: String },

    #[error("an executor for step type '{step_type}' is already registered")]
    DuplicateExecutor { step_type: String },
}

/// Registered agents, ordered by name
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(RegistryError::DuplicateAgent { name });
        }
        self.agents.insert(name, agent);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// First agent, by name, that accepts `capability`
    pub fn find_capable(&self, capability: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .values()
            .find(|agent| agent.can_handle(capability))
            .cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
