//! CLI surface (`suggestd run|doctor|stop`). Grounded in the teacher's
//! `clap`-derive subcommand layout in `main.rs`, generalized from a
//! single-mode server binary to a small service-management CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "suggestd", about = "Shell command suggestion daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Override the config-resolved database path.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Override the config-resolved socket path.
    #[arg(long, global = true)]
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (default if no subcommand given).
    Run,
    /// Open the store read-only and report its health without binding
    /// the socket: schema version, row counts, socket reachability.
    Doctor,
    /// Signal a running daemon to shut down gracefully.
    Stop,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
