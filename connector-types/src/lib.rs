//! # connector-types
//!
//! Data model for the WiseTime → Allisa connector.
//!
//! This crate provides the foundational types used across all connector crates:
//! - [`Watermark`], [`InstanceId`], [`IdempotencyKey`], [`CycleId`] - Identity and ordering types
//! - [`TimePosting`] - Posted time as fetched from WiseTime
//! - [`MappedRecord`] - The Allisa representation of a posting
//! - [`DeliveryOutcome`] - Per-record delivery result
//! - [`SyncError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod outcome;
mod posting;

pub use error::{SyncError, ValidationError};
pub use ids::{CycleId, IdempotencyKey, InstanceId, InvalidInstanceId, Watermark};
pub use outcome::{DeliveryOutcome, OutcomeKind};
pub use posting::{
    Actor, DurationSplitStrategy, MappedRecord, SourceBatch, Tag, TimePosting, TimeRow,
};
