//! Configuration loading with multi-layer merge

use super::{AgentConfig, WorkflowConfig, is_valid_seconds};
use crate::workflow::validate_workflow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level agentflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine-wide execution settings
    #[serde(default)]
    pub workflow: WorkflowSettings,

    /// Agents built at startup
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution defaults applied to every run
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowSettings {
    /// Retry steps without their own retry policy
    pub auto_retry_failed_steps: bool,

    /// Attempts per step when auto-retrying
    pub default_max_attempts: u32,

    /// Delay before the first auto-retry
    pub retry_delay_seconds: f64,

    /// Per-attempt timeout for steps without their own; 0 disables it
    pub step_timeout_seconds: f64,

    /// Timeout for workflows without their own; 0 disables it
    pub workflow_timeout_seconds: f64,

    /// Run independent steps concurrently
    pub enable_step_parallelization: bool,

    /// Cap on steps in flight per run
    pub max_concurrent_steps: Option<usize>,

    /// Finished runs kept for status queries
    pub keep_completed_runs: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            auto_retry_failed_steps: true,
            default_max_attempts: 3,
            retry_delay_seconds: 1.0,
            step_timeout_seconds: 60.0,
            workflow_timeout_seconds: 300.0,
            enable_step_parallelization: true,
            max_concurrent_steps: None,
            keep_completed_runs: 100,
        }
    }
}

impl WorkflowSettings {
    /// Preset for `simple`, `medium` or `complex` workflows
    ///
    /// Simple workflows run one step at a time under short timeouts; complex
    /// ones get long timeouts. Unknown levels get the defaults.
    pub fn for_complexity(complexity: &str) -> Self {
        match complexity {
            "simple" => Self {
                step_timeout_seconds: 30.0,
                workflow_timeout_seconds: 60.0,
                enable_step_parallelization: false,
                ..Default::default()
            },
            "complex" => Self {
                step_timeout_seconds: 300.0,
                workflow_timeout_seconds: 1800.0,
                auto_retry_failed_steps: true,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    /// Check that every duration is a finite, non-negative number of seconds
    pub fn check(&self) -> Result<(), Vec<String>> {
        let errors: Vec<String> = [
            ("retry_delay_seconds", self.retry_delay_seconds),
            ("step_timeout_seconds", self.step_timeout_seconds),
            ("workflow_timeout_seconds", self.workflow_timeout_seconds),
        ]
        .into_iter()
        .filter(|(_, seconds)| !is_valid_seconds(*seconds))
        .map(|(field, seconds)| {
            format!("workflow.{} = {} is not a finite, non-negative duration", field, seconds)
        })
        .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn merge(&mut self, other: Self) {
        let defaults = Self::default();

        if other.auto_retry_failed_steps != defaults.auto_retry_failed_steps {
            self.auto_retry_failed_steps = other.auto_retry_failed_steps;
        }
        if other.default_max_attempts != defaults.default_max_attempts {
            self.default_max_attempts = other.default_max_attempts;
        }
        if other.retry_delay_seconds != defaults.retry_delay_seconds {
            self.retry_delay_seconds = other.retry_delay_seconds;
        }
        if other.step_timeout_seconds != defaults.step_timeout_seconds {
            self.step_timeout_seconds = other.step_timeout_seconds;
        }
        if other.workflow_timeout_seconds != defaults.workflow_timeout_seconds {
            self.workflow_timeout_seconds = other.workflow_timeout_seconds;
        }
        if other.enable_step_parallelization != defaults.enable_step_parallelization {
            self.enable_step_parallelization = other.enable_step_parallelization;
        }
        if other.max_concurrent_steps.is_some() {
            self.max_concurrent_steps = other.max_concurrent_steps;
        }
        if other.keep_completed_runs != defaults.keep_completed_runs {
            self.keep_completed_runs = other.keep_completed_runs;
        }
    }
}

/// Logging preferences for the binary
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter level (`error`, `info`, `debug`, ...)
    pub level: Option<String>,

    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/agentflow/config.toml
    /// 3. .agentflow/config.toml (project)
    /// 4. AGENTFLOW_* environment variables
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".agentflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".agentflow/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config
            .workflow
            .check()
            .map_err(|errors| anyhow::anyhow!("invalid settings: {}", errors.join("; ")))?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/agentflow/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("agentflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        self.workflow.merge(other.workflow);

        // Agents are keyed by name; other wins
        for agent in other.agents {
            match self.agents.iter_mut().find(|a| a.name == agent.name) {
                Some(existing) => *existing = agent,
                None => self.agents.push(agent),
            }
        }

        if other.logging.level.is_some() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }
    }

    /// Apply `AGENTFLOW_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("AGENTFLOW_STEP_TIMEOUT") {
            self.workflow.step_timeout_seconds = parse_seconds("AGENTFLOW_STEP_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("AGENTFLOW_WORKFLOW_TIMEOUT") {
            self.workflow.workflow_timeout_seconds =
                parse_seconds("AGENTFLOW_WORKFLOW_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("AGENTFLOW_MAX_CONCURRENT_STEPS") {
            let limit: usize = value.trim().parse().with_context(|| {
                format!("AGENTFLOW_MAX_CONCURRENT_STEPS: invalid count '{}'", value)
            })?;
            self.workflow.max_concurrent_steps = Some(limit);
        }
        if let Some(value) = lookup("AGENTFLOW_AUTO_RETRY") {
            self.workflow.auto_retry_failed_steps = parse_flag(&value)
                .with_context(|| format!("AGENTFLOW_AUTO_RETRY: invalid flag '{}'", value))?;
        }
        if let Some(value) = lookup("AGENTFLOW_LOG_LEVEL") {
            self.logging.level = Some(value.trim().to_lowercase());
        }
        Ok(())
    }

    /// Get an agent definition by name
    pub fn get_agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<f64> {
    let seconds: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{}: invalid number '{}'", key, value))?;
    if !is_valid_seconds(seconds) {
        anyhow::bail!("{}: '{}' is not a finite, non-negative duration", key, value);
    }
    Ok(seconds)
}

/// Load and validate a workflow definition
///
/// `.json` files are read as JSON, anything else as TOML.
pub fn load_workflow(path: &Path) -> Result<WorkflowConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let workflow: WorkflowConfig = if is_json {
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    } else {
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    };

    validate_workflow(&workflow)
        .with_context(|| format!("validating workflow '{}'", workflow.name))?;

    Ok(workflow)
}
