use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The official CLI for Alfred's whiteboard event fabric and manager
/// orchestrator: runs the Runtime Worker, the subagent fleet, and the HTTP
/// subscriber/user-action surfaces (C2/C6-C10/C11) as one process.
#[derive(Debug, Parser)]
#[command(name = "alfred", version, about)]
pub struct Cli {
    /// Path to `config.toml` (§6.6). Defaults to the resolved workspace path.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Runs the Runtime Worker, subagent fleets, and HTTP server until
    /// interrupted (Ctrl-C).
    Serve {
        /// Address the subscriber/user-action HTTP surface binds to.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Writes a default `config.toml` at the resolved workspace path (or
    /// `--config`) if one doesn't already exist.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
        /// Users to watch, e.g. `--user alice --user bob`.
        #[arg(long = "user")]
        users: Vec<String>,
    },
    /// Prints the resolved configuration as TOML.
    Config,
}
