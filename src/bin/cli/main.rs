mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vocab-sync-cli", about = "Offline-first vocabulary sync engine", version)]
struct Cli {
    /// Config file (default: <config dir>/vocab-sync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured user id
    #[arg(long, global = true)]
    user: Option<String>,

    /// Treat the device as offline (queue only, no remote calls)
    #[arg(long, global = true)]
    offline: bool,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show sync status, queue counts and local row counts
    Status {
        /// Also list pending and failed operations
        #[arg(long)]
        operations: bool,
    },

    /// Pull all words and progress from the remote store
    Sync,

    /// Pull this user's progress only
    SyncProgress,

    /// Push locally changed progress to the remote store
    Push,

    /// Drop the local mirror and pull everything again
    Refresh,

    /// Fill in stories missing from local words
    Stories,

    /// Process queued operations now
    Drain,

    /// Move failed operations back to pending
    RetryFailed,

    /// Discard failed operations
    ClearFailed,

    /// List words due for review
    Due {
        /// Maximum results
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Generate stories for words that lack one
    Enrich {
        /// Stop after this many batches
        #[arg(long)]
        batches: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let app = app::App::new(cli.config.as_deref(), cli.user.as_deref(), !cli.offline)?;

    match cli.command {
        Command::Status { operations } => {
            commands::status::run(&app, operations, &cli.format)?;
        }
        Command::Sync => {
            commands::sync::run_full(&app, &cli.format).await?;
        }
        Command::SyncProgress => {
            commands::sync::run_progress(&app, &cli.format).await?;
        }
        Command::Push => {
            commands::sync::run_push(&app, &cli.format).await?;
        }
        Command::Refresh => {
            commands::sync::run_refresh(&app, &cli.format).await?;
        }
        Command::Stories => {
            commands::sync::run_stories(&app, &cli.format).await?;
        }
        Command::Drain => {
            commands::queue::run_drain(&app, &cli.format).await?;
        }
        Command::RetryFailed => {
            commands::queue::run_retry_failed(&app, &cli.format).await?;
        }
        Command::ClearFailed => {
            commands::queue::run_clear_failed(&app, &cli.format)?;
        }
        Command::Due { limit } => {
            commands::due::run(&app, limit, &cli.format)?;
        }
        Command::Enrich { batches } => {
            commands::enrich::run(&app, batches, &cli.format).await?;
        }
    }

    Ok(())
}
