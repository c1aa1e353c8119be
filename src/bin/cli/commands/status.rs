use anyhow::{Context, Result};

use vocab_sync::queue::QueuedOperation;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, operations: bool, format: &OutputFormat) -> Result<()> {
    let state = &app.state;
    let indicator = state.indicator();
    let stats = state.store.stats().context("Failed to read local store")?;
    let pending = state.queue.pending_operations();
    let failed = state.queue.failed_operations();

    match format {
        OutputFormat::Json => {
            let mut output = serde_json::json!({
                "indicator": indicator,
                "summary": indicator.to_string(),
                "queue": state.queue.status(),
                "sync": state.sync.status(),
                "store": stats,
                "userId": state.config.sync_config().user_id,
            });
            if operations {
                output["pending"] = serde_json::to_value(&pending)?;
                output["failed"] = serde_json::to_value(&failed)?;
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", indicator);
            if let Some(error) = &indicator.error {
                println!("  last error: {}", error);
            }
            println!("  {} words, {} progress rows", stats.words, stats.progress);
            if operations {
                print_operations("Pending", &pending);
                print_operations("Failed", &failed);
            }
        }
    }

    Ok(())
}

fn print_operations(label: &str, ops: &[QueuedOperation]) {
    println!();
    println!("{} ({}):", label, ops.len());
    for op in ops {
        let error = op.last_error.as_deref().unwrap_or("");
        println!(
            "  {} {:<16} retries {}/{}  {}",
            op.created_at.format("%Y-%m-%d %H:%M:%S"),
            op.kind.to_string(),
            op.retry_count,
            op.max_retries,
            error
        );
    }
}
