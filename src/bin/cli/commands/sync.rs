use anyhow::{Context, Result};

use vocab_sync::sync::{SyncError, SyncOutcome};

use crate::app::App;
use crate::OutputFormat;

pub async fn run_full(app: &App, format: &OutputFormat) -> Result<()> {
    report(app.state.sync.full_sync().await, "Full sync failed", format)
}

pub async fn run_progress(app: &App, format: &OutputFormat) -> Result<()> {
    report(app.state.sync.sync_progress().await, "Progress sync failed", format)
}

pub async fn run_push(app: &App, format: &OutputFormat) -> Result<()> {
    report(app.state.sync.push_local_to_cloud().await, "Push failed", format)
}

pub async fn run_refresh(app: &App, format: &OutputFormat) -> Result<()> {
    report(app.state.sync.force_refresh().await, "Refresh failed", format)
}

pub async fn run_stories(app: &App, format: &OutputFormat) -> Result<()> {
    report(app.state.sync.sync_missing_stories().await, "Story refresh failed", format)
}

fn report(outcome: Result<SyncOutcome, SyncError>, what: &'static str, format: &OutputFormat) -> Result<()> {
    if let Err(SyncError::Partial { applied, .. }) = &outcome {
        eprintln!("{} row(s) were applied before the failure", applied);
    }
    let outcome = outcome.context(what)?;

    match format {
        OutputFormat::Json => {
            let output = match &outcome {
                SyncOutcome::Completed(result) => serde_json::json!({
                    "skipped": false,
                    "result": result,
                    "summary": result.summary(),
                }),
                SyncOutcome::Skipped => serde_json::json!({ "skipped": true }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => match &outcome {
            SyncOutcome::Completed(result) => {
                println!("{} ({} ms)", result.summary(), result.duration_ms);
            }
            SyncOutcome::Skipped => println!("Another sync is already running"),
        },
    }

    Ok(())
}
