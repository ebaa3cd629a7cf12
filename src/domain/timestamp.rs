//! Timestamp normalization for server-provided instants.
//!
//! Database rows often carry timestamps without zone information
//! (`2025-11-16 07:38:30.123`). Those are UTC by contract and must never be
//! interpreted in the local zone, otherwise fresh messages render as if they
//! were sent hours ago or in the future.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized timestamp: {raw}")]
pub struct TimestampError {
    pub raw: String,
}

/// Parses a server timestamp into an absolute UTC instant.
///
/// Explicit offsets are honoured; zone-less values are read as UTC.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ZONED_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(TimestampError {
        raw: trimmed.to_owned(),
    })
}

/// Human label for how long ago `at` happened relative to `now`.
///
/// Anything under a minute, including instants slightly ahead of `now`
/// because of clock skew, is "just now".
pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(at).num_seconds();

    if seconds < 60 {
        return "just now".to_owned();
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }

    plural(hours / 24, "day")
}

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

pub fn deserialize_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc(&raw).map_err(serde::de::Error::custom)
}

pub fn deserialize_utc_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|value| parse_utc(&value).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid instant")
    }

    #[test]
    fn parses_rfc3339_with_z_suffix() {
        let parsed = parse_utc("2025-11-16T07:38:30Z").expect("must parse");

        assert_eq!(parsed, utc(2025, 11, 16, 7, 38, 30));
    }

    #[test]
    fn honours_explicit_offsets() {
        let parsed = parse_utc("2025-11-16T10:38:30+03:00").expect("must parse");

        assert_eq!(parsed, utc(2025, 11, 16, 7, 38, 30));
    }

    #[test]
    fn honours_short_postgres_offsets() {
        let parsed = parse_utc("2025-11-16 09:38:30.500+02").expect("must parse");

        assert_eq!(parsed.timestamp(), utc(2025, 11, 16, 7, 38, 30).timestamp());
    }

    #[test]
    fn zone_less_database_timestamp_is_utc() {
        let parsed = parse_utc("2025-11-16 07:38:30.123").expect("must parse");

        assert_eq!(parsed.timestamp(), utc(2025, 11, 16, 7, 38, 30).timestamp());
        assert_eq!(parsed.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn zone_less_iso_timestamp_is_utc() {
        let parsed = parse_utc("2025-11-16T07:38:30").expect("must parse");

        assert_eq!(parsed, utc(2025, 11, 16, 7, 38, 30));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_utc("yesterday").expect_err("must fail");

        assert_eq!(err.raw, "yesterday");
    }

    #[test]
    fn fresh_zone_less_message_reads_just_now() {
        let created = parse_utc("2025-11-16 07:38:30").expect("must parse");
        let now = utc(2025, 11, 16, 7, 38, 45);

        assert_eq!(relative_label(created, now), "just now");
    }

    #[test]
    fn future_instants_clamp_to_just_now() {
        let now = utc(2025, 11, 16, 7, 38, 30);

        assert_eq!(relative_label(utc(2025, 11, 16, 7, 40, 0), now), "just now");
    }

    #[test]
    fn labels_minutes_hours_and_days() {
        let now = utc(2025, 11, 16, 12, 0, 0);

        assert_eq!(relative_label(utc(2025, 11, 16, 11, 59, 0), now), "1 minute ago");
        assert_eq!(relative_label(utc(2025, 11, 16, 11, 15, 0), now), "45 minutes ago");
        assert_eq!(relative_label(utc(2025, 11, 16, 9, 0, 0), now), "3 hours ago");
        assert_eq!(relative_label(utc(2025, 11, 14, 12, 0, 0), now), "2 days ago");
    }

    #[test]
    fn deserializes_optional_zone_less_field() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "deserialize_utc_opt")]
            at: Option<DateTime<Utc>>,
        }

        let row: Row = serde_json::from_str(r#"{"at":"2025-11-16 07:38:30"}"#).expect("row");
        let empty: Row = serde_json::from_str(r#"{"at":null}"#).expect("row");

        assert_eq!(row.at, Some(utc(2025, 11, 16, 7, 38, 30)));
        assert_eq!(empty.at, None);
    }
}
