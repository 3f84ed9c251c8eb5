mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use planwise_types::metrics::EventGenerationMode;

#[derive(Parser)]
#[command(
    name = "planwise",
    version,
    about = "Multi-year workforce simulation runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a multi-year simulation
    Run {
        /// Path to simulation YAML file
        config: PathBuf,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Validate simulation configuration and state backend
    Check {
        /// Path to simulation YAML file
        config: PathBuf,
    },
    /// Inspect or discard stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// First simulated year (overrides simulation.start_year)
    #[arg(long)]
    pub start_year: Option<i32>,
    /// Last simulated year (overrides simulation.end_year)
    #[arg(long)]
    pub end_year: Option<i32>,
    /// Event-generation backend (primary, secondary)
    #[arg(long)]
    pub mode: Option<EventGenerationMode>,
    /// Stop at the first failed year
    #[arg(long, conflicts_with = "no_fail_fast")]
    pub fail_fast: bool,
    /// Keep going after a failed year, skipping the rest
    #[arg(long)]
    pub no_fail_fast: bool,
    /// Discard existing checkpoints and start over
    #[arg(long)]
    pub no_resume: bool,
    /// Run identifier (default: the scenario name)
    #[arg(long)]
    pub run_id: Option<String>,
}

impl RunArgs {
    fn fail_fast_override(&self) -> Option<bool> {
        match (self.fail_fast, self.no_fail_fast) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints recorded for a run
    List {
        /// Path to simulation YAML file
        config: PathBuf,
        /// Run identifier (default: the scenario name)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Delete every checkpoint and snapshot of a run
    Purge {
        /// Path to simulation YAML file
        config: PathBuf,
        /// Run identifier (default: the scenario name)
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(&cli.log_level)?;

    match cli.command {
        Commands::Run { config, args } => commands::run::execute(&config, &args).await,
        Commands::Check { config } => {
            commands::check::execute(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Checkpoints { action } => {
            match action {
                CheckpointAction::List { config, run_id } => {
                    commands::checkpoints::list(&config, run_id.as_deref())?;
                }
                CheckpointAction::Purge { config, run_id } => {
                    commands::checkpoints::purge(&config, run_id.as_deref())?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
