//! Operator-facing entry point: parses CLI arguments, loads
//! configuration, initializes logging, and dispatches to the requested
//! subcommand (§6 External Interfaces lists the HTTP surface this
//! process backs; the binary itself is CLI-only per §1 Non-goals
//! "command-line entry" is out of core scope but still needs a front
//! door).

use clap::Parser;
use fleetsync::cli::{self, Cli, Commands, ConfigCommands, NodeCommands};
use fleetsync::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = fleetsync::app::Config::load(&cli.config)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    config.init_logging();

    match cli.command {
        Commands::Run => cli::run::run(&config).await,
        Commands::Stats => cli::stats::run(&config).await,
        Commands::Node { command: NodeCommands::Status } => cli::node::status(&config).await,
        Commands::Config { command: ConfigCommands::Show } => cli::config::show(&cli.config),
        Commands::Config { command: ConfigCommands::Validate } => cli::config::validate(&cli.config),
    }
}
