//! Identity and ordering types for the connector.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Position in the WiseTime posted-time stream.
///
/// Sequence ids are assigned by the source and strictly increase in stream
/// order. A watermark marks the last position whose postings have all reached
/// a terminal outcome.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Watermark(u64);

impl Watermark {
    /// Create a new Watermark with the given sequence value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Watermark.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Create a Watermark representing "nothing synced yet".
    pub fn zero() -> Self {
        Self(0)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watermark({})", self.0)
    }
}

/// Identity of a connector deployment.
///
/// All persisted state (watermark, delivery ledger, dead letters) is keyed
/// by instance id so several connectors can share one state store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

/// Returned when an instance id is empty or contains unsupported characters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid instance id {0:?}: use 1-64 ASCII letters, digits, '-', '_' or '.'")]
pub struct InvalidInstanceId(pub String);

impl InstanceId {
    /// Maximum length of an instance id.
    pub const MAX_LEN: usize = 64;

    /// Parse and validate an instance id.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidInstanceId> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= Self::MAX_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(value))
        } else {
            Err(InvalidInstanceId(value))
        }
    }

    /// Get the instance id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstanceId {
    type Error = InvalidInstanceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

/// Deterministic key attached to every outbound Allisa request.
///
/// Derived from the WiseTime source id only, so re-mapping the same posting
/// always yields the same key. Hex-encoded SHA-256 (64 chars).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    const DOMAIN: &'static [u8] = b"wisetime-allisa-idempotency-v1";

    /// Derive the key for a source posting id.
    pub fn derive(source_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(Self::DOMAIN);
        hasher.update([0u8]);
        hasher.update(source_id.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Restore a key previously produced by [`IdempotencyKey::derive`].
    ///
    /// Returns `None` unless the value is 64 lowercase hex characters.
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(value.to_string()))
    }

    /// Key for a single Allisa case within a multi-case posting.
    pub fn scoped(&self, scope: impl fmt::Display) -> String {
        format!("{}-{}", self.0, scope)
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", &self.0[..self.0.len().min(12)])
    }
}

/// Identifier of one synchronization cycle, used for log correlation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(uuid::Uuid);

impl CycleId {
    /// Create a new random CycleId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CycleId({})", self.0)
    }
}
