//! CLI argument definitions for the Orda binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Orda push-pull server
#[derive(Parser, Debug)]
#[command(name = "orda")]
#[command(about = "Orda: CRDT datatypes over a checkpointed push-pull protocol")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the push-pull server
    Serve(ServeArgs),
    /// Check health of a running Orda server
    Health(HealthArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 19861, env = "ORDA_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "ORDA_HOST")]
    pub host: String,

    /// JSON file the server state is loaded from and saved to on shutdown.
    /// Without it the state lives only in memory.
    #[arg(short = 'f', long, env = "ORDA_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Optional JSON file with server settings
    #[arg(short, long, env = "ORDA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server sequences between stored snapshots
    #[arg(long, env = "ORDA_SNAPSHOT_INTERVAL")]
    pub snapshot_interval: Option<u64>,

    /// Reject collections that do not exist yet
    #[arg(long)]
    pub no_auto_create: bool,
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Base URL of the server to check
    #[arg(default_value = "http://127.0.0.1:19861", env = "ORDA_URL")]
    pub url: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}
