//! Validate configuration and test connectivity.

use anyhow::{bail, Context, Result};
use connector_service::{Config, Connector};

/// Run the check command.
///
/// The configuration was already validated when it was loaded.
pub async fn run(config: &Config) -> Result<()> {
    println!("Configuration: OK");
    println!("  Instance:  {}", config.connector.instance_id);
    println!("  WiseTime:  {}", config.wisetime.base_url);
    println!(
        "  Allisa:    {} (cases: {}, posts: {})",
        config.allisa.base_url, config.allisa.case_type, config.allisa.post_type
    );
    println!(
        "  Tag sync:  {}",
        if config.tag_sync.enabled { "enabled" } else { "disabled" }
    );
    println!();

    let connector = Connector::from_config(config)
        .await
        .context("Failed to set up connector")?;

    if connector.check_target().await {
        println!("Allisa: reachable");
        Ok(())
    } else {
        println!("Allisa: NOT REACHABLE");
        bail!("Allisa did not answer at {}", config.allisa.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_config;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unreachable_allisa_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let err = run(&config).await.unwrap_err();
        assert!(err.to_string().contains("did not answer"));
    }
}
