//! Posted time as fetched from WiseTime and its Allisa representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IdempotencyKey, Watermark};

/// A time group posted by a WiseTime user.
///
/// Immutable once fetched. `sequence` is the position of the posting in the
/// source stream and is what the watermark tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePosting {
    /// WiseTime time group id.
    pub id: String,
    /// Position in the posted-time stream.
    pub sequence: u64,
    /// Free-form narrative written by the user.
    #[serde(default)]
    pub narrative: String,
    /// Group duration. Differs from the sum of the rows when the user edited it.
    pub total_duration_secs: u64,
    /// The user who posted the time.
    pub user: Actor,
    /// Tags the time was posted against.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Individual activity rows.
    #[serde(default)]
    pub time_rows: Vec<TimeRow>,
    /// How the duration is shared between several tags.
    #[serde(default)]
    pub duration_split_strategy: DurationSplitStrategy,
}

impl TimePosting {
    /// The watermark reached once this posting is terminal.
    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.sequence)
    }

    /// Start of the earliest time row.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.time_rows.iter().map(|row| row.started_at).min()
    }

    /// Sum of the row durations, `None` if it overflows.
    pub fn rows_duration_secs(&self) -> Option<u64> {
        self.time_rows
            .iter()
            .try_fold(0u64, |total, row| total.checked_add(row.duration_secs))
    }

    /// Whether the user edited the group duration before posting.
    pub fn was_duration_edited(&self) -> bool {
        self.rows_duration_secs() != Some(self.total_duration_secs)
    }
}

/// The WiseTime user behind a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Display name.
    pub name: String,
    /// Id of the user in the external system (the Allisa user id).
    #[serde(default)]
    pub external_id: Option<String>,
    /// Percentage applied to unedited durations when computing chargeable time.
    #[serde(default = "default_experience_weighting")]
    pub experience_weighting_percent: u8,
}

fn default_experience_weighting() -> u8 {
    100
}

/// A WiseTime tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name. For connector tags this is the Allisa case reference.
    pub name: String,
    /// Tag path, e.g. `/Allisa/`.
    #[serde(default)]
    pub path: String,
}

/// A single activity row inside a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRow {
    /// When the activity started (UTC).
    pub started_at: DateTime<Utc>,
    /// Duration of the activity.
    pub duration_secs: u64,
    /// Activity type code, expected to be the same for every row.
    #[serde(default)]
    pub activity_code: Option<String>,
    /// Free-form description (window title, document name, ...).
    #[serde(default)]
    pub description: Option<String>,
}

/// How a posting's duration is shared between its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurationSplitStrategy {
    /// Divide the duration equally between all relevant tags.
    #[default]
    DivideBetweenTags,
    /// Post the whole duration against every relevant tag.
    WholeDurationToEachTag,
}

/// One page of the posted-time stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBatch {
    /// Postings strictly after the requested watermark, in sequence order.
    pub postings: Vec<TimePosting>,
    /// Watermark to commit once every posting is terminal.
    pub next_watermark: Watermark,
}

impl SourceBatch {
    /// A batch with no postings.
    pub fn empty(since: Watermark) -> Self {
        Self {
            postings: Vec::new(),
            next_watermark: since,
        }
    }

    /// Number of postings in the batch.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    /// Check if the batch has no postings.
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// A posting translated into the shape Allisa expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedRecord {
    /// Deterministic key derived from `source_id`.
    pub idempotency_key: IdempotencyKey,
    /// WiseTime time group id this record was mapped from.
    pub source_id: String,
    /// Stream position of the source posting.
    pub watermark: Watermark,
    /// Allisa case references (connector tag names). May be empty.
    pub case_references: Vec<String>,
    /// Allisa user id.
    pub user_id: String,
    /// Narrative text for the time entry.
    pub narrative: String,
    /// Start of the activity, `yyyy-MM-dd HH:mm:ss` in the configured zone.
    pub start_date_time: String,
    /// Actual time per case.
    pub total_time_secs: u64,
    /// Chargeable time per case.
    pub chargeable_time_secs: u64,
    /// Activity type code (empty when not set).
    pub activity_code: String,
}

impl MappedRecord {
    /// Whether there is nothing to post for this record.
    pub fn is_noop(&self) -> bool {
        self.case_references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(hour: u32, secs: u64) -> TimeRow {
        TimeRow {
            started_at: Utc.with_ymd_and_hms(2018, 11, 1, hour, 0, 0).unwrap(),
            duration_secs: secs,
            activity_code: Some("activity1".into()),
            description: None,
        }
    }

    fn posting(rows: Vec<TimeRow>, total: u64) -> TimePosting {
        TimePosting {
            id: "g-1".into(),
            sequence: 7,
            narrative: "Drafted response".into(),
            total_duration_secs: total,
            user: Actor {
                name: "Pat".into(),
                external_id: Some("42".into()),
                experience_weighting_percent: 100,
            },
            tags: vec![],
            time_rows: rows,
            duration_split_strategy: DurationSplitStrategy::default(),
        }
    }

    #[test]
    fn started_at_is_earliest_row() {
        let p = posting(vec![row(22, 300), row(21, 600)], 900);
        assert_eq!(
            p.started_at(),
            Some(Utc.with_ymd_and_hms(2018, 11, 1, 21, 0, 0).unwrap())
        );
    }

    #[test]
    fn detects_edited_duration() {
        assert!(!posting(vec![row(21, 600), row(22, 300)], 900).was_duration_edited());
        assert!(posting(vec![row(21, 600), row(22, 300)], 1500).was_duration_edited());
    }

    #[test]
    fn row_duration_overflow_is_detected() {
        let p = posting(vec![row(21, u64::MAX), row(22, 1)], 0);
        assert_eq!(p.rows_duration_secs(), None);
        assert_eq!(
            posting(vec![row(21, 600), row(22, 300)], 0).rows_duration_secs(),
            Some(900)
        );
    }

    #[test]
    fn watermark_is_sequence() {
        assert_eq!(posting(vec![], 0).watermark(), Watermark::new(7));
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let json = r#"{
            "id": "g-9",
            "sequence": 101,
            "totalDurationSecs": 60,
            "user": { "name": "Sam", "externalId": "7" },
            "timeRows": [
                { "startedAt": "2020-01-01T09:00:00Z", "durationSecs": 60 }
            ]
        }"#;
        let p: TimePosting = serde_json::from_str(json).unwrap();
        assert_eq!(p.sequence, 101);
        assert_eq!(p.user.experience_weighting_percent, 100);
        assert!(p.tags.is_empty());
        assert_eq!(p.narrative, "");
        assert_eq!(
            p.duration_split_strategy,
            DurationSplitStrategy::DivideBetweenTags
        );
    }

    #[test]
    fn split_strategy_wire_names() {
        let s: DurationSplitStrategy =
            serde_json::from_str("\"WHOLE_DURATION_TO_EACH_TAG\"").unwrap();
        assert_eq!(s, DurationSplitStrategy::WholeDurationToEachTag);
    }

    #[test]
    fn empty_batch_keeps_watermark() {
        let batch = SourceBatch::empty(Watermark::new(5));
        assert!(batch.is_empty());
        assert_eq!(batch.next_watermark, Watermark::new(5));
    }
}
