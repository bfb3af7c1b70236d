//! Blight CLI - field companion shell
//!
//! Sign in, capture history, remedy lookup, and manual sync against the
//! Blight backend, sharing the offline-first engine with the mobile
//! shell.

mod cli;
mod commands;
mod error;
mod session_store;

use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blight=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(error) = commands::run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
