//! # connector-service
//!
//! Posts time recorded in WiseTime to Allisa cases.
//!
//! Each cycle:
//! - Polls the postings after the committed watermark
//! - Maps each posting to one Allisa time entry per case tag
//! - Delivers the entries with bounded retries and concurrency
//! - Commits the new watermark once every posting reached a terminal outcome
//!
//! ## Architecture
//!
//! ```text
//!  WiseTime ──► Poller ──► Mapper ──► Dispatcher ──► Allisa
//!                 ▲                        │
//!                 │     ┌──────────────┐   │
//!                 └─────┤  StateStore  │◄──┘
//!                       │ (SQLite/JSON)│
//!                       └──────────────┘
//! ```
//!
//! A retryable failure holds the watermark, so the next cycle redelivers
//! the batch. The delivery ledger in the store keeps already accepted
//! entries from being posted twice.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod runner;
pub mod store;
pub mod tag_sync;

pub use config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
pub use engine::{CycleReport, Engine, EngineSettings};
pub use error::{EngineError, StoreError};
pub use metrics::ConnectorMetrics;
pub use runner::{run, shutdown_signal, Connector};
pub use store::{DeadLetter, StateStore};
