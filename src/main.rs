mod auth;
mod commands;
mod config;
mod engine;
mod error;
mod gmail;
mod mime;
mod models;
mod registry;
mod rules;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;
pub mod util;

use clap::{Parser, Subcommand};
use models::Output;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gmail-relay")]
#[command(version, about = "Forward unread Gmail to per-account distribution lists", long_about = None)]
struct Cli {
    /// Config file (default: ~/.gmail-relay/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward unread mail until the daily cutoff window
    Run,

    /// Authorize one account and store its token
    Auth {
        /// Gmail address to authorize
        account: String,
    },

    /// Validate the rule files and print the accepted rules
    Rules,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run => commands::run(config).await,
        Commands::Auth { account } => commands::auth(config, &account).await,
        Commands::Rules => commands::list_rules(config).await,
    };

    if let Err(e) = result {
        Output::<()>::error(e.to_string()).print();
        std::process::exit(1);
    }
}
