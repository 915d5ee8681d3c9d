//! Translation of WiseTime postings into Allisa time entries.
//!
//! Mapping is pure and deterministic: the same posting and configuration
//! always produce the same [`MappedRecord`], including its idempotency key.
//! That property is what makes re-dispatching a batch safe.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use connector_types::{
    DurationSplitStrategy, IdempotencyKey, MappedRecord, Tag, TimePosting, ValidationError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default tag path for tags created by the connector.
pub const DEFAULT_TAG_UPSERT_PATH: &str = "/Allisa/";

/// Default Allisa form field names (identity mapping).
pub const DEFAULT_FIELD_MAPPING: &str = "pid:pid,userId:userId,narrative:narrative,\
startDateTime:startDateTime,totalTimeSecs:totalTimeSecs,\
chargeableTimeSecs:chargeableTimeSecs,activityCode:activityCode";

const START_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors in mapping configuration (detected at startup).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingConfigError {
    /// An entry of the field mapping is not `key:value`.
    #[error("invalid post field mapping entry: {0:?}")]
    InvalidEntry(String),

    /// Required fields are missing from the field mapping.
    #[error("invalid post field mapping, missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// The time zone is neither a known zone name nor a UTC offset.
    #[error("invalid time zone {0:?}: expected a name such as Europe/Berlin or an offset such as +08:00")]
    InvalidTimeZone(String),
}

/// Fields of an Allisa time post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PostField {
    /// Allisa case id.
    Pid,
    /// Allisa user id.
    UserId,
    /// Narrative text.
    Narrative,
    /// Activity start.
    StartDateTime,
    /// Actual time in seconds.
    TotalTimeSecs,
    /// Chargeable time in seconds.
    ChargeableTimeSecs,
    /// Activity type code.
    ActivityCode,
}

impl PostField {
    /// Every field, in form order.
    pub const ALL: [PostField; 7] = [
        PostField::Pid,
        PostField::UserId,
        PostField::Narrative,
        PostField::StartDateTime,
        PostField::TotalTimeSecs,
        PostField::ChargeableTimeSecs,
        PostField::ActivityCode,
    ];

    /// Key used on the left-hand side of the field mapping.
    pub fn key(&self) -> &'static str {
        match self {
            PostField::Pid => "pid",
            PostField::UserId => "userId",
            PostField::Narrative => "narrative",
            PostField::StartDateTime => "startDateTime",
            PostField::TotalTimeSecs => "totalTimeSecs",
            PostField::ChargeableTimeSecs => "chargeableTimeSecs",
            PostField::ActivityCode => "activityCode",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

/// Maps post fields to the form field names of the Allisa post type.
///
/// Parsed from `key:name,key:name,...`. Every [`PostField`] must be present;
/// unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    names: BTreeMap<PostField, String>,
}

impl FieldMapping {
    /// Form field name for a post field.
    pub fn name(&self, field: PostField) -> &str {
        // Construction guarantees every field is present.
        self.names.get(&field).map(String::as_str).unwrap_or(field.key())
    }

    /// Form fields for posting `record` against the Allisa case `case_id`.
    pub fn form_fields(&self, record: &MappedRecord, case_id: u64) -> Vec<(String, String)> {
        PostField::ALL
            .into_iter()
            .map(|field| {
                let value = match field {
                    PostField::Pid => case_id.to_string(),
                    PostField::UserId => record.user_id.clone(),
                    PostField::Narrative => record.narrative.clone(),
                    PostField::StartDateTime => record.start_date_time.clone(),
                    PostField::TotalTimeSecs => record.total_time_secs.to_string(),
                    PostField::ChargeableTimeSecs => record.chargeable_time_secs.to_string(),
                    PostField::ActivityCode => record.activity_code.clone(),
                };
                (self.name(field).to_string(), value)
            })
            .collect()
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            names: PostField::ALL
                .into_iter()
                .map(|f| (f, f.key().to_string()))
                .collect(),
        }
    }
}

impl FromStr for FieldMapping {
    type Err = MappingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut names = BTreeMap::new();
        for item in s.split(',') {
            let parts: Vec<&str> = item.split(':').collect();
            if parts.len() != 2 || parts[0].trim().is_empty() || parts[1].trim().is_empty() {
                return Err(MappingConfigError::InvalidEntry(item.to_string()));
            }
            if let Some(field) = PostField::from_key(parts[0].trim()) {
                names.insert(field, parts[1].trim().to_string());
            }
        }

        let missing: Vec<String> = PostField::ALL
            .into_iter()
            .filter(|f| !names.contains_key(f))
            .map(|f| f.key().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(MappingConfigError::MissingFields(missing));
        }

        Ok(Self { names })
    }
}

impl fmt::Display for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self
            .names
            .iter()
            .map(|(field, name)| format!("{}:{}", field.key(), name))
            .collect();
        f.write_str(&joined.join(","))
    }
}

/// Time zone of the Allisa start date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingTimeZone {
    /// A fixed offset from UTC.
    Fixed(FixedOffset),
    /// An IANA zone such as `Europe/Berlin`, with daylight saving.
    Named(Tz),
}

impl PostingTimeZone {
    /// Local wall-clock time of `instant`, in the Allisa date-time format.
    ///
    /// Named zones resolve their offset at `instant` itself.
    pub fn format_local(&self, instant: DateTime<Utc>) -> String {
        match self {
            Self::Fixed(offset) => instant
                .with_timezone(offset)
                .format(START_DATE_TIME_FORMAT)
                .to_string(),
            Self::Named(tz) => instant
                .with_timezone(tz)
                .format(START_DATE_TIME_FORMAT)
                .to_string(),
        }
    }
}

impl Default for PostingTimeZone {
    fn default() -> Self {
        Self::Fixed(Utc.fix())
    }
}

impl fmt::Display for PostingTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// Parse a time zone setting.
///
/// Fixed offsets (`UTC`, `+08:00`) are tried first, then IANA names
/// (`Europe/Berlin`).
pub fn parse_time_zone(value: &str) -> Result<PostingTimeZone, MappingConfigError> {
    if let Ok(offset) = parse_utc_offset(value) {
        return Ok(PostingTimeZone::Fixed(offset));
    }
    value
        .trim()
        .parse::<Tz>()
        .map(PostingTimeZone::Named)
        .map_err(|_| MappingConfigError::InvalidTimeZone(value.to_string()))
}

/// Parse a fixed UTC offset.
///
/// Accepts `UTC`, `Z`, `+08:00`, `-0530` and `+8`.
fn parse_utc_offset(value: &str) -> Result<FixedOffset, MappingConfigError> {
    let invalid = || MappingConfigError::InvalidTimeZone(value.to_string());
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return Ok(Utc.fix());
    }

    let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if hours > 18 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Settings that influence mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// Path of tags created by the connector.
    pub tag_upsert_path: String,
    /// Zone used for the Allisa start date-time.
    pub time_zone: PostingTimeZone,
    /// Append a summary of row descriptions to the narrative.
    pub add_summary_to_narrative: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            tag_upsert_path: DEFAULT_TAG_UPSERT_PATH.to_string(),
            time_zone: PostingTimeZone::default(),
            add_summary_to_narrative: false,
        }
    }
}

/// Maps postings to Allisa records.
#[derive(Debug, Clone, Default)]
pub struct Mapper {
    config: MapperConfig,
}

impl Mapper {
    /// Create a mapper with the given settings.
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    /// The mapper settings.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Whether a tag was created by this connector.
    pub fn is_connector_tag(&self, tag: &Tag) -> bool {
        let path = self.config.tag_upsert_path.as_str();
        tag.path == path || tag.path == path.trim_matches('/')
    }

    /// Tags of the posting that are not handled by this connector.
    pub fn foreign_tags<'a>(&self, posting: &'a TimePosting) -> Vec<&'a Tag> {
        posting
            .tags
            .iter()
            .filter(|tag| !self.is_connector_tag(tag))
            .collect()
    }

    /// Map a posting to its Allisa record.
    ///
    /// A posting without connector tags maps to a no-op record (nothing to
    /// post). Otherwise time rows and a numeric user external id are required.
    pub fn map(&self, posting: &TimePosting) -> Result<MappedRecord, ValidationError> {
        if posting.id.trim().is_empty() {
            return Err(ValidationError::MissingSourceId);
        }

        let case_references: Vec<String> = posting
            .tags
            .iter()
            .filter(|tag| self.is_connector_tag(tag))
            .map(|tag| tag.name.clone())
            .collect();

        if case_references.is_empty() {
            return Ok(self.noop_record(posting));
        }

        let started_at = posting.started_at().ok_or(ValidationError::NoTimeRows)?;

        let user_id = posting
            .user
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingActor)?;
        if !user_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::NonNumericActor {
                external_id: user_id.to_string(),
            });
        }

        let activity_code = single_activity_code(posting)?;

        let rows_secs = posting
            .rows_duration_secs()
            .ok_or(ValidationError::DurationOverflow)?;
        let chargeable_secs = if posting.was_duration_edited() {
            // Edited durations are used as is, without experience weighting.
            posting.total_duration_secs
        } else {
            weighted(rows_secs, posting.user.experience_weighting_percent)
                .ok_or(ValidationError::DurationOverflow)?
        };

        let share = match posting.duration_split_strategy {
            DurationSplitStrategy::DivideBetweenTags => case_references.len() as u64,
            DurationSplitStrategy::WholeDurationToEachTag => 1,
        };

        Ok(MappedRecord {
            idempotency_key: IdempotencyKey::derive(&posting.id),
            source_id: posting.id.clone(),
            watermark: posting.watermark(),
            case_references,
            user_id: user_id.to_string(),
            narrative: self.narrative(posting),
            start_date_time: self.config.time_zone.format_local(started_at),
            total_time_secs: divide_rounded(rows_secs, share),
            chargeable_time_secs: divide_rounded(chargeable_secs, share),
            activity_code,
        })
    }

    fn noop_record(&self, posting: &TimePosting) -> MappedRecord {
        MappedRecord {
            idempotency_key: IdempotencyKey::derive(&posting.id),
            source_id: posting.id.clone(),
            watermark: posting.watermark(),
            case_references: Vec::new(),
            user_id: posting.user.external_id.clone().unwrap_or_default(),
            narrative: posting.narrative.clone(),
            start_date_time: String::new(),
            total_time_secs: 0,
            chargeable_time_secs: 0,
            activity_code: String::new(),
        }
    }

    fn narrative(&self, posting: &TimePosting) -> String {
        let mut narrative = posting.narrative.trim().to_string();
        if !self.config.add_summary_to_narrative {
            return narrative;
        }

        let mut seen = Vec::new();
        for description in posting
            .time_rows
            .iter()
            .filter_map(|row| row.description.as_deref())
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            if !seen.contains(&description) {
                seen.push(description);
            }
        }
        if seen.is_empty() {
            return narrative;
        }

        if !narrative.is_empty() {
            narrative.push_str("\n\n");
        }
        let summary: Vec<String> = seen.iter().map(|d| format!("- {d}")).collect();
        narrative.push_str(&summary.join("\n"));
        narrative
    }
}

fn single_activity_code(posting: &TimePosting) -> Result<String, ValidationError> {
    let mut codes: Vec<String> = Vec::new();
    for code in posting
        .time_rows
        .iter()
        .filter_map(|row| row.activity_code.as_deref())
    {
        if !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }
    match codes.len() {
        0 => Ok(String::new()),
        1 => Ok(codes.remove(0)),
        _ => Err(ValidationError::MixedActivityCodes { codes }),
    }
}

fn weighted(secs: u64, percent: u8) -> Option<u64> {
    Some(divide_rounded(secs.checked_mul(u64::from(percent))?, 100))
}

/// `value / parts`, rounding halves up.
fn divide_rounded(value: u64, parts: u64) -> u64 {
    if parts <= 1 {
        return value;
    }
    let (quotient, remainder) = (value / parts, value % parts);
    quotient + u64::from(remainder >= parts - parts / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use connector_types::{Actor, TimeRow};

    fn tag(path: &str, name: &str) -> Tag {
        Tag {
            name: name.into(),
            path: path.into(),
        }
    }

    fn row(hour: u32, secs: u64, code: &str) -> TimeRow {
        TimeRow {
            started_at: Utc.with_ymd_and_hms(2018, 11, 1, hour, 0, 0).unwrap(),
            duration_secs: secs,
            activity_code: Some(code.into()),
            description: None,
        }
    }

    fn posting() -> TimePosting {
        TimePosting {
            id: "group-1".into(),
            sequence: 101,
            narrative: "Reviewed filing".into(),
            total_duration_secs: 900,
            user: Actor {
                name: "Pat".into(),
                external_id: Some("42".into()),
                experience_weighting_percent: 50,
            },
            tags: vec![tag("/Allisa/", "CASE-1")],
            time_rows: vec![row(21, 600, "activity1"), row(22, 300, "activity1")],
            duration_split_strategy: DurationSplitStrategy::DivideBetweenTags,
        }
    }

    fn manila_mapper() -> Mapper {
        Mapper::new(MapperConfig {
            time_zone: parse_time_zone("+08:00").unwrap(),
            ..MapperConfig::default()
        })
    }

    #[test]
    fn maps_posting_with_experience_weighting() {
        let record = manila_mapper().map(&posting()).unwrap();

        assert_eq!(record.case_references, vec!["CASE-1".to_string()]);
        assert_eq!(record.user_id, "42");
        assert_eq!(record.start_date_time, "2018-11-02 05:00:00");
        assert_eq!(record.total_time_secs, 900);
        assert_eq!(record.chargeable_time_secs, 450);
        assert_eq!(record.activity_code, "activity1");
        assert_eq!(record.watermark.value(), 101);
    }

    #[test]
    fn edited_duration_ignores_weighting() {
        let mut p = posting();
        p.total_duration_secs = 1500;

        let record = manila_mapper().map(&p).unwrap();
        assert_eq!(record.total_time_secs, 900);
        assert_eq!(record.chargeable_time_secs, 1500);
    }

    #[test]
    fn mapping_is_deterministic() {
        let mapper = manila_mapper();
        let p = posting();
        let first = mapper.map(&p).unwrap();
        let second = mapper.map(&p).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.idempotency_key, IdempotencyKey::derive("group-1"));
    }

    #[test]
    fn foreign_tags_are_ignored() {
        let mut p = posting();
        p.tags.push(tag("/NotAllisa/", "OTHER"));

        let mapper = manila_mapper();
        let record = mapper.map(&p).unwrap();
        assert_eq!(record.case_references, vec!["CASE-1".to_string()]);
        // Irrelevant tags do not split the duration.
        assert_eq!(record.chargeable_time_secs, 450);
        assert_eq!(mapper.foreign_tags(&p).len(), 1);
    }

    #[test]
    fn stripped_tag_path_is_accepted() {
        let mapper = Mapper::default();
        assert!(mapper.is_connector_tag(&tag("Allisa", "X")));
        assert!(mapper.is_connector_tag(&tag("/Allisa/", "X")));
        assert!(!mapper.is_connector_tag(&tag("/Other/", "X")));
    }

    #[test]
    fn no_connector_tags_is_noop() {
        let mut p = posting();
        p.tags = vec![tag("/Other/", "X")];
        p.time_rows.clear();

        let record = Mapper::default().map(&p).unwrap();
        assert!(record.is_noop());
    }

    #[test]
    fn missing_rows_is_validation_error() {
        let mut p = posting();
        p.time_rows.clear();
        assert_eq!(Mapper::default().map(&p), Err(ValidationError::NoTimeRows));
    }

    #[test]
    fn missing_actor_is_validation_error() {
        let mut p = posting();
        p.user.external_id = None;
        assert_eq!(Mapper::default().map(&p), Err(ValidationError::MissingActor));

        p.user.external_id = Some("  ".into());
        assert_eq!(Mapper::default().map(&p), Err(ValidationError::MissingActor));
    }

    #[test]
    fn non_numeric_actor_is_validation_error() {
        let mut p = posting();
        p.user.external_id = Some("pat".into());
        assert_eq!(
            Mapper::default().map(&p),
            Err(ValidationError::NonNumericActor {
                external_id: "pat".into()
            })
        );
    }

    #[test]
    fn oversized_durations_are_validation_errors() {
        let mut p = posting();
        p.time_rows[1].duration_secs = u64::MAX;
        assert_eq!(
            Mapper::default().map(&p),
            Err(ValidationError::DurationOverflow)
        );

        // The sum fits but the experience weighting does not.
        let mut p = posting();
        p.time_rows.truncate(1);
        p.time_rows[0].duration_secs = u64::MAX / 10;
        p.total_duration_secs = u64::MAX / 10;
        assert_eq!(
            Mapper::default().map(&p),
            Err(ValidationError::DurationOverflow)
        );
    }

    #[test]
    fn rounding_matches_half_up() {
        assert_eq!(divide_rounded(900, 2), 450);
        assert_eq!(divide_rounded(5, 2), 3);
        assert_eq!(divide_rounded(4, 3), 1);
        assert_eq!(divide_rounded(u64::MAX, 2), u64::MAX / 2 + 1);
        assert_eq!(weighted(900, 50), Some(450));
        assert_eq!(weighted(1, 50), Some(1));
    }

    #[test]
    fn mixed_activity_codes_rejected() {
        let mut p = posting();
        p.time_rows[1].activity_code = Some("activity2".into());
        assert!(matches!(
            Mapper::default().map(&p),
            Err(ValidationError::MixedActivityCodes { .. })
        ));
    }

    #[test]
    fn missing_activity_code_maps_to_empty() {
        let mut p = posting();
        for row in &mut p.time_rows {
            row.activity_code = None;
        }
        assert_eq!(Mapper::default().map(&p).unwrap().activity_code, "");
    }

    #[test]
    fn divides_between_connector_tags() {
        let mut p = posting();
        p.tags.push(tag("/Allisa/", "CASE-2"));

        let record = Mapper::default().map(&p).unwrap();
        assert_eq!(record.case_references.len(), 2);
        assert_eq!(record.total_time_secs, 450);
        assert_eq!(record.chargeable_time_secs, 225);
    }

    #[test]
    fn whole_duration_to_each_tag() {
        let mut p = posting();
        p.tags.push(tag("/Allisa/", "CASE-2"));
        p.duration_split_strategy = DurationSplitStrategy::WholeDurationToEachTag;

        let record = Mapper::default().map(&p).unwrap();
        assert_eq!(record.total_time_secs, 900);
    }

    #[test]
    fn summary_appended_to_narrative() {
        let mut p = posting();
        p.time_rows[0].description = Some("Outlook".into());
        p.time_rows[1].description = Some("Outlook".into());
        let mapper = Mapper::new(MapperConfig {
            add_summary_to_narrative: true,
            ..MapperConfig::default()
        });

        let record = mapper.map(&p).unwrap();
        assert_eq!(record.narrative, "Reviewed filing\n\n- Outlook");
    }

    #[test]
    fn field_mapping_default_parses() {
        let mapping: FieldMapping = DEFAULT_FIELD_MAPPING.parse().unwrap();
        assert_eq!(mapping, FieldMapping::default());
        assert_eq!(mapping.name(PostField::Pid), "pid");
    }

    #[test]
    fn field_mapping_renames_fields() {
        let raw = "pid:ID,userId:mitarbeiter,narrative:text,startDateTime:start,\
                   totalTimeSecs:dauer,chargeableTimeSecs:abrechenbar,activityCode:code";
        let mapping: FieldMapping = raw.parse().unwrap();
        assert_eq!(mapping.name(PostField::UserId), "mitarbeiter");
        assert_eq!(mapping.to_string().split(',').count(), 7);
    }

    #[test]
    fn field_mapping_rejects_bad_entry() {
        let err = "pid".parse::<FieldMapping>().unwrap_err();
        assert!(matches!(err, MappingConfigError::InvalidEntry(_)));
    }

    #[test]
    fn field_mapping_reports_missing_fields() {
        let err = "pid:pid,userId:userId".parse::<FieldMapping>().unwrap_err();
        match err {
            MappingConfigError::MissingFields(fields) => {
                assert!(fields.contains(&"narrative".to_string()));
                assert_eq!(fields.len(), 5);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn form_fields_use_mapped_names() {
        let record = manila_mapper().map(&posting()).unwrap();
        let raw = DEFAULT_FIELD_MAPPING.replace("pid:pid", "pid:ID");
        let mapping: FieldMapping = raw.parse().unwrap();

        let fields = mapping.form_fields(&record, 77);
        assert_eq!(fields[0], ("ID".to_string(), "77".to_string()));
        assert!(fields.contains(&("chargeableTimeSecs".to_string(), "450".to_string())));
    }

    #[test]
    fn utc_offset_parsing() {
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(
            parse_utc_offset("-0530").unwrap().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert_eq!(parse_utc_offset("+8").unwrap().local_minus_utc(), 8 * 3600);
        assert!(parse_utc_offset("Asia/Manila").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn time_zone_accepts_names_and_offsets() {
        assert_eq!(
            parse_time_zone("Europe/Berlin").unwrap(),
            PostingTimeZone::Named(chrono_tz::Europe::Berlin)
        );
        assert_eq!(
            parse_time_zone("+08:00").unwrap(),
            PostingTimeZone::Fixed(FixedOffset::east_opt(8 * 3600).unwrap())
        );
        assert_eq!(parse_time_zone("UTC").unwrap(), PostingTimeZone::default());
        assert!(matches!(
            parse_time_zone("Mars/Olympus"),
            Err(MappingConfigError::InvalidTimeZone(_))
        ));
    }

    #[test]
    fn named_zone_follows_daylight_saving() {
        // Berlin switched to summer time on 2018-03-25.
        let mapper = Mapper::new(MapperConfig {
            time_zone: parse_time_zone("Europe/Berlin").unwrap(),
            ..MapperConfig::default()
        });

        let mut winter = posting();
        for r in &mut winter.time_rows {
            r.started_at = Utc.with_ymd_and_hms(2018, 3, 24, 9, 0, 0).unwrap();
        }
        let mut summer = posting();
        for r in &mut summer.time_rows {
            r.started_at = Utc.with_ymd_and_hms(2018, 3, 26, 9, 0, 0).unwrap();
        }

        assert_eq!(
            mapper.map(&winter).unwrap().start_date_time,
            "2018-03-24 10:00:00"
        );
        assert_eq!(
            mapper.map(&summer).unwrap().start_date_time,
            "2018-03-26 11:00:00"
        );
    }
}
