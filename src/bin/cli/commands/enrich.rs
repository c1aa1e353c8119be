use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub async fn run(app: &App, batches: Option<usize>, format: &OutputFormat) -> Result<()> {
    let worker = app
        .state
        .enrichment_worker()
        .context("Failed to set up enrichment")?
        .with_max_batches(batches);
    let report = worker.run().await.context("Enrichment failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} enriched, {} failed in {} batch(es)",
                report.enriched, report.failed, report.batches
            );
            if let Some(cursor) = &report.cursor {
                println!("Stopped after '{}'; run again to continue", cursor);
            }
        }
    }
    Ok(())
}
