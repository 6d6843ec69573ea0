use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the CLI flags and configured level
///
/// `--debug` and `--quiet` win over the configured level.
fn filter_directive(debug: bool, quiet: bool, level: Option<&str>) -> String {
    let level = if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        level.unwrap_or("info")
    };
    format!("agentflow={}", level)
}

/// Initialize logging based on output mode and debug flag
///
/// With a log file, JSON lines are written to it through a background
/// writer; keep the returned guard alive until exit so they get flushed.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    level: Option<&str>,
    log_file: Option<PathBuf>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(filter_directive(debug, quiet, level))?;

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);

        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .try_init()?;

        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(None)
    }
}

/// Get default log file path for a workflow
pub fn default_log_path(workflow_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("agentflow")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", workflow_name, timestamp);

    Ok(log_dir.join(filename))
}
