use agentflow::cli::{self, CancellationToken, OutputEvent, OutputMode};
use agentflow::config::EngineConfig;
use agentflow::logging;
use agentflow::workflow::WorkflowEngine;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Workflow orchestration for named agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file ("auto" for the default location)
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow definition (.toml or .json)
        workflow: PathBuf,

        /// Initial data as a JSON object
        #[arg(long)]
        data: Option<String>,

        /// Print the finished run as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow without running
    Validate {
        /// Workflow definition (.toml or .json)
        workflow: PathBuf,
    },

    /// List configured agents
    Agents,
}

fn resolve(project_dir: Option<&Path>, path: &Path) -> PathBuf {
    match project_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn log_file(cli: &Cli, config: &EngineConfig) -> Result<Option<PathBuf>> {
    let name = match &cli.command {
        Commands::Run { workflow, .. } | Commands::Validate { workflow } => workflow
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "agentflow".into()),
        Commands::Agents => "agentflow".into(),
    };

    match cli.log_file.as_deref() {
        Some("auto") => Ok(Some(logging::default_log_path(&name)?)),
        Some(path) => Ok(Some(PathBuf::from(shellexpand::tilde(path).as_ref()))),
        None => Ok(config
            .logging
            .file
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = cli.dir.as_deref();
    let config = EngineConfig::load(project_dir)?;

    let guard = logging::init_logging(
        cli.debug,
        cli.quiet,
        config.logging.level.as_deref(),
        log_file(&cli, &config)?,
    )?;

    let engine = WorkflowEngine::from_config(&config)?;

    let code = match &cli.command {
        Commands::Run {
            workflow,
            data,
            json,
        } => {
            let path = resolve(project_dir, workflow);
            let handler = cli::create_handler(OutputMode::from_flags(*json, cli.quiet), cli.debug);

            let token = CancellationToken::new();
            tokio::spawn(cli::setup_signal_handlers(token.clone()));

            match cli::run_workflow(&path, data.as_deref(), &engine, &*handler, &token).await {
                Ok(code) => code,
                Err(error) => {
                    handler.emit(OutputEvent::WorkflowError { error });
                    1
                }
            }
        }

        Commands::Validate { workflow } => {
            let handler = cli::create_handler(OutputMode::Console, cli.debug);
            cli::validate_workflow(&resolve(project_dir, workflow), &*handler)
        }

        Commands::Agents => {
            let handler = cli::create_handler(OutputMode::Console, cli.debug);
            cli::list_agents(&config, &engine, &*handler)
        }
    };

    // Flush file logs before exiting
    drop(guard);
    std::process::exit(code)
}
