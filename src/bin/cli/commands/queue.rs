use anyhow::{Context, Result};

use vocab_sync::queue::{DrainReport, DrainStop};

use crate::app::App;
use crate::OutputFormat;

pub async fn run_drain(app: &App, format: &OutputFormat) -> Result<()> {
    let report = app.state.queue.drain().await;
    print_report(app, &report, format)
}

pub async fn run_retry_failed(app: &App, format: &OutputFormat) -> Result<()> {
    let moved = app
        .state
        .queue
        .retry_failed()
        .context("Failed to reset failed operations")?;
    if matches!(format, OutputFormat::Plain) {
        println!("{} operation(s) moved back to pending", moved);
    }
    let report = app.state.queue.drain().await;
    print_report(app, &report, format)
}

pub fn run_clear_failed(app: &App, format: &OutputFormat) -> Result<()> {
    let removed = app
        .state
        .queue
        .clear_failed()
        .context("Failed to clear failed operations")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        OutputFormat::Plain => println!("{} failed operation(s) discarded", removed),
    }
    Ok(())
}

fn print_report(app: &App, report: &DrainReport, format: &OutputFormat) -> Result<()> {
    let status = app.state.queue.status();
    let stop = match report.stop {
        DrainStop::Empty => "empty",
        DrainStop::Offline => "offline",
        DrainStop::Paused => "paused",
        DrainStop::AlreadyRunning => "already running",
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "succeeded": report.succeeded,
                "retried": report.retried,
                "failed": report.failed,
                "stop": stop,
                "queue": status,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} sent, {} retried, {} failed (stopped: {})",
                report.succeeded, report.retried, report.failed, stop
            );
            println!("{} pending, {} failed in queue", status.pending_count, status.failed_count);
        }
    }
    Ok(())
}
