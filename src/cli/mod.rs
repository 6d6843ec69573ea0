//! CLI module for agentflow
//!
//! This module provides:
//! - Command implementations (run, validate, agents)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for cancelling a run

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{EXIT_CANCELLED, exit_code, list_agents, run_workflow, validate_workflow};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
pub use signals::{CancellationToken, setup_signal_handlers, with_cancellation};
