//! # connector-core
//!
//! Pure logic for the WiseTime → Allisa connector (no I/O, instant tests).
//!
//! This crate implements the mapping rules, the per-batch state machine and
//! the watermark bookkeeping without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about when the watermark may move
//!
//! The actual I/O (HTTP, state store) is performed by `connector-service`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ledger;
pub mod mapping;
pub mod retry;
pub mod state;
pub mod watermark;

pub use ledger::{BatchDecision, LedgerError, OutcomeLedger, OutcomeSummary};
pub use mapping::{
    parse_time_zone, FieldMapping, Mapper, MapperConfig, MappingConfigError, PostField,
    PostingTimeZone, DEFAULT_FIELD_MAPPING, DEFAULT_TAG_UPSERT_PATH,
};
pub use retry::RetryPolicy;
pub use state::{BatchAction, BatchEvent, BatchState, CycleEvent};
pub use watermark::{SyncState, WatermarkError};
