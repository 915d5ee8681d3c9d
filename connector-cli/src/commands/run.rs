//! Run the connector until interrupted.

use anyhow::{Context, Result};
use connector_service::Config;

/// Run the run command.
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(
        instance = %config.connector.instance_id,
        version = env!("CARGO_PKG_VERSION"),
        "starting allisa-connector"
    );
    connector_service::run(config)
        .await
        .context("Connector stopped with an error")
}
