//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::{StepExecution, StepStatus, WorkflowContext, WorkflowStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Events emitted while running CLI commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    WorkflowStart {
        name: String,
        steps: usize,
    },
    StepComplete {
        name: String,
        status: StepStatus,
        attempts: u32,
        duration_ms: Option<u64>,
        error: Option<String>,
    },
    WorkflowComplete {
        status: WorkflowStatus,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_ms: Option<u64>,
    },
    WorkflowError {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

impl OutputEvent {
    pub fn step(name: &str, exec: &StepExecution) -> Self {
        Self::StepComplete {
            name: name.to_string(),
            status: exec.status,
            attempts: exec.attempts,
            duration_ms: exec.duration_ms,
            error: exec.error.clone(),
        }
    }

    pub fn finished(ctx: &WorkflowContext) -> Self {
        let counts = ctx.counts();
        let duration_ms = ctx
            .started_at()
            .zip(ctx.completed_at())
            .map(|(start, end)| (end - start).num_milliseconds().max(0) as u64);

        Self::WorkflowComplete {
            status: ctx.status(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            duration_ms,
        }
    }
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write the final run
    fn result(&self, ctx: &WorkflowContext);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }

    fn marker(status: StepStatus) -> &'static str {
        match status {
            StepStatus::Succeeded => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
            _ => "?",
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::WorkflowStart { name, steps } => {
                eprintln!("Running workflow '{}' ({} steps)", name, steps);
            }
            OutputEvent::StepComplete {
                name,
                status,
                attempts,
                duration_ms,
                error,
            } => {
                let timing = duration_ms
                    .map(|ms| format!(" ({})", Self::format_duration(ms)))
                    .unwrap_or_default();
                let retries = if attempts > 1 {
                    format!(" after {} attempts", attempts)
                } else {
                    String::new()
                };
                eprintln!("  {} {} {}{}{}", Self::marker(status), name, status, retries, timing);
                if let Some(error) = error {
                    eprintln!("      {}", error);
                }
            }
            OutputEvent::WorkflowComplete {
                status,
                succeeded,
                failed,
                skipped,
                duration_ms,
            } => {
                let timing = duration_ms.map(Self::format_duration).unwrap_or_default();
                eprintln!();
                eprintln!(
                    "Workflow {}: {} succeeded, {} failed, {} skipped {}",
                    status, succeeded, failed, skipped, timing
                );
            }
            OutputEvent::WorkflowError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, ctx: &WorkflowContext) {
        if !ctx.data().is_empty() {
            if let Ok(data) = serde_json::to_string_pretty(ctx.data()) {
                println!("{}", data);
            }
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    // Only the final run goes to stdout so the output stays a single document
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, ctx: &WorkflowContext) {
        self.print_json(ctx);
    }
}

/// Quiet handler: no progress, final data only
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, ctx: &WorkflowContext) {
        println!("{}", Value::Object(ctx.data().clone()));
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(true)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
