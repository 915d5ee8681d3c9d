//! Show sync status.

use anyhow::{Context, Result};
use connector_service::store;
use connector_service::Config;

/// Dead letters counted in the summary.
const DEAD_LETTER_WINDOW: usize = 1000;

/// Run the status command.
pub async fn run(config: &Config) -> Result<()> {
    let instance = config.instance_id()?;
    let store = store::open(&config.storage)
        .await
        .context("Failed to open state store")?;

    println!("=== allisa-connector status ===");
    println!();
    println!("Instance: {}", instance);
    println!(
        "Store:    {:?} ({})",
        config.storage.backend,
        config.storage.path.display()
    );
    println!();

    match store.load_watermark(&instance).await? {
        Some(watermark) => println!("Watermark: {}", watermark),
        None => {
            println!("Watermark: NONE (starts from the beginning)");
        }
    }

    let letters = store.dead_letters(&instance, DEAD_LETTER_WINDOW).await?;
    if letters.is_empty() {
        println!("Dead letters: none");
    } else {
        let shown = if letters.len() == DEAD_LETTER_WINDOW {
            format!("{}+", DEAD_LETTER_WINDOW)
        } else {
            letters.len().to_string()
        };
        println!("Dead letters: {}", shown);
        if let Some(latest) = letters.first() {
            println!(
                "  latest: {} at {} ({})",
                latest.source_id, latest.recorded_at, latest.reason
            );
        }
        println!();
        println!("Run 'allisa-connector dead-letters' for details.");
    }

    Ok(())
}
