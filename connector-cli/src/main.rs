//! # allisa-connector
//!
//! Posts WiseTime time to Allisa cases.
//!
//! ## Commands
//!
//! - `run`: Poll until SIGINT or SIGTERM
//! - `sync-once`: Run a single cycle and exit
//! - `status`: Show the watermark and recent dead letters
//! - `reset`: Move the watermark (operator override)
//! - `check`: Validate configuration and test the Allisa connection
//! - `dead-letters`: List postings that were set aside
//!
//! ## Example
//!
//! ```bash
//! # Validate the configuration
//! allisa-connector --config connector.toml check
//!
//! # Run one cycle
//! allisa-connector --config connector.toml sync-once
//!
//! # Replay everything after position 1000 (posts that time again)
//! allisa-connector --config connector.toml reset --to 1000 --force
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use connector_service::{Config, DEFAULT_CONFIG_FILE};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::{check, dead_letters, once, reset, run, status};

/// Posts WiseTime time to Allisa cases.
#[derive(Parser, Debug)]
#[command(name = "allisa-connector")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./connector.toml, then the user config dir)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll WiseTime and post to Allisa until interrupted
    Run,

    /// Run a single sync cycle and exit
    SyncOnce,

    /// Show the committed watermark and recent dead letters
    Status,

    /// Move the committed watermark
    Reset {
        /// New watermark
        #[arg(long)]
        to: u64,

        /// Allow moving back; the time after the new watermark is posted again
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration and check that Allisa answers
    Check,

    /// List postings that were set aside
    DeadLetters {
        /// Maximum number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let path = match cli.config {
        Some(path) => path,
        None => default_config_path(),
    };
    let config = load_config(&path)?;

    match cli.command {
        Commands::Run => run::run(config).await?,
        Commands::SyncOnce => once::run(&config).await?,
        Commands::Status => status::run(&config).await?,
        Commands::Reset { to, force } => reset::run(&config, to, force).await?,
        Commands::Check => check::run(&config).await?,
        Commands::DeadLetters { limit } => dead_letters::run(&config, limit).await?,
    }

    Ok(())
}

/// Initialize the tracing subscriber from `RUST_LOG`, falling back to
/// `default_level`. Logs go to stderr so command output stays clean.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// `./connector.toml` if present, else the platform config directory.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    directories::ProjectDirs::from("io", "wisetime", "allisa-connector")
        .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_reset() {
        let cli = Cli::parse_from(["allisa-connector", "--config", "c.toml", "reset", "--to", "42"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(
            cli.command,
            Commands::Reset {
                to: 42,
                force: false
            }
        ));

        let cli = Cli::parse_from(["allisa-connector", "reset", "--to", "7", "--force"]);
        assert!(matches!(cli.command, Commands::Reset { to: 7, force: true }));
    }

    #[test]
    fn dead_letters_limit_defaults_to_twenty() {
        let cli = Cli::parse_from(["allisa-connector", "dead-letters"]);
        assert!(matches!(cli.command, Commands::DeadLetters { limit: 20 }));
    }
}
