use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, limit: usize, format: &OutputFormat) -> Result<()> {
    let due = app
        .state
        .vocab
        .due_reviews(limit)
        .context("Failed to query due reviews")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&due)?);
        }
        OutputFormat::Plain => {
            if due.is_empty() {
                println!("Nothing due");
            }
            for progress in &due {
                let at = progress
                    .next_review_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<24} due {}  interval {}d  ease {:.2}",
                    progress.word_key, at, progress.interval_days, progress.ease_factor
                );
            }
        }
    }

    Ok(())
}
