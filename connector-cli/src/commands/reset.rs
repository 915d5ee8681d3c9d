//! Move the committed watermark.

use anyhow::{bail, Context, Result};
use connector_service::{Config, Connector, EngineError};
use connector_types::Watermark;

/// Run the reset command.
///
/// Moving the watermark back makes the next cycle fetch and post those
/// postings again. Committed deliveries are no longer tracked, so Allisa
/// receives duplicate time entries. That direction is refused without
/// `force`.
pub async fn run(config: &Config, to: u64, force: bool) -> Result<()> {
    let connector = Connector::from_config(config)
        .await
        .context("Failed to set up connector")?;
    let to = Watermark::new(to);

    let previous = match connector.reset_watermark(to, force).await {
        Ok(previous) => previous,
        Err(EngineError::Watermark(e)) => bail!("{e}; pass --force to move it back anyway"),
        Err(e) => return Err(e).context("Failed to move watermark"),
    };

    match previous {
        Some(previous) if to < previous => println!(
            "Watermark moved back from {} to {}; later postings will be posted again",
            previous, to
        ),
        Some(previous) => println!("Watermark moved from {} to {}", previous, to),
        None => println!("Watermark set to {}", to),
    }
    Ok(())
}
