//! Command-line interface definitions: operator-facing subcommands over
//! the Store, built on `clap::Subcommand`.

pub mod config;
pub mod node;
pub mod output;
pub mod run;
pub mod stats;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fleetsync - control plane for a fleet of proxy nodes backing user subscriptions.
#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control-plane scheduler (foreground)
    Run,

    /// Node-related read-only views
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Fleet-wide subscription/usage summary
    Stats,

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum NodeCommands {
    /// List every node with its availability and token-refresh state
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Load the configuration file and report any problems
    Validate,
}
