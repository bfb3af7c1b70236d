use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blight")]
#[command(about = "Field companion for crop disease classification")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Sign out and clear stored credentials
    Logout {
        /// Revoke every session of this account, not just this device
        #[arg(long)]
        all: bool,
    },
    /// Show session and sync status
    Status,
    /// Run one sync cycle now
    Sync,
    /// List recent captures
    History {
        /// Number of captures to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Browse cached remedies
    Remedies {
        /// Show one remedy by disease code instead of listing all
        code: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
