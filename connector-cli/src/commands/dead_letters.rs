//! List dead letters.

use anyhow::{Context, Result};
use connector_service::store;
use connector_service::Config;

/// Run the dead-letters command.
pub async fn run(config: &Config, limit: usize) -> Result<()> {
    let instance = config.instance_id()?;
    let store = store::open(&config.storage)
        .await
        .context("Failed to open state store")?;

    let letters = store.dead_letters(&instance, limit).await?;
    if letters.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    for letter in &letters {
        println!(
            "{}  {:<18}  {:>10}  {}",
            letter.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            letter.kind.to_string(),
            letter.watermark.to_string(),
            letter.source_id
        );
        println!("    {}", letter.reason);
    }
    println!();
    println!("{} shown (most recent first)", letters.len());
    Ok(())
}
