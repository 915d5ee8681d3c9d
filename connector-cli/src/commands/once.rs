//! Run a single sync cycle.

use anyhow::{Context, Result};
use connector_service::{Config, Connector};

/// Run the sync-once command.
pub async fn run(config: &Config) -> Result<()> {
    let connector = Connector::from_config(config)
        .await
        .context("Failed to set up connector")?;

    let report = connector.sync_once().await.context("Sync cycle failed")?;

    println!("Cycle {}", report.cycle_id);
    println!("  Postings:  {}", report.postings);
    println!("  Outcomes:  {}", report.summary);
    if report.advanced() {
        println!("  Watermark: {} -> {}", report.since, report.watermark);
    } else {
        println!("  Watermark: {} (unchanged)", report.watermark);
    }
    Ok(())
}
