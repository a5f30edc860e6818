//! Heterogeneous timestamps
//!
//! The backend emits unix seconds, unix milliseconds, or ISO-8601 strings
//! depending on which code path produced the record. Everything is compared
//! as unix milliseconds after normalization.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Numbers below this magnitude are unix seconds, anything above is millis.
/// 1e11 seconds is year 5138; 1e11 millis is March 1973.
const SECONDS_CUTOFF: f64 = 100_000_000_000.0;

/// A timestamp exactly as received on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Number(f64),
    Text(String),
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::Number(0.0)
    }
}

impl Timestamp {
    /// Build from unix milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Timestamp::Number(millis as f64)
    }

    /// Normalize to unix milliseconds, `None` when the value can't be read.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Timestamp::Number(value) => number_to_millis(*value),
            Timestamp::Text(value) => text_to_millis(value),
        }
    }

    /// Normalized unix milliseconds; unreadable values sort first.
    pub fn millis_or_zero(&self) -> i64 {
        self.as_millis().unwrap_or(0)
    }
}

fn number_to_millis(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    if value.abs() < SECONDS_CUTOFF {
        Some((value * 1000.0).round() as i64)
    } else {
        Some(value.round() as i64)
    }
}

fn text_to_millis(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(number) = trimmed.parse::<f64>() {
        return number_to_millis(number);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }
    // Python's isoformat() drops the offset for naive datetimes; treat as UTC.
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn seconds_and_millis_normalize_to_same_instant() {
        let secs = Timestamp::Number(1_700_000_000.0);
        let millis = Timestamp::Number(1_700_000_000_000.0);
        assert_eq!(secs.as_millis(), Some(1_700_000_000_000));
        assert_eq!(secs.as_millis(), millis.as_millis());
    }

    #[test]
    fn fractional_seconds_keep_sub_second_precision() {
        let ts = Timestamp::Number(1_700_000_000.25);
        assert_eq!(ts.as_millis(), Some(1_700_000_000_250));
    }

    #[test]
    fn iso_strings_with_and_without_offset() {
        let zulu = Timestamp::Text("2023-11-14T22:13:20Z".to_string());
        let naive = Timestamp::Text("2023-11-14T22:13:20.000".to_string());
        let offset = Timestamp::Text("2023-11-14T23:13:20+01:00".to_string());
        assert_eq!(zulu.as_millis(), Some(1_700_000_000_000));
        assert_eq!(naive.as_millis(), zulu.as_millis());
        assert_eq!(offset.as_millis(), zulu.as_millis());
    }

    #[test]
    fn numeric_strings_are_numbers() {
        let ts = Timestamp::Text("1700000000".to_string());
        assert_eq!(ts.as_millis(), Some(1_700_000_000_000));
    }

    #[test]
    fn garbage_is_unreadable() {
        assert_eq!(Timestamp::Text("yesterday".to_string()).as_millis(), None);
        assert_eq!(Timestamp::Text("yesterday".to_string()).millis_or_zero(), 0);
    }

    #[test]
    fn deserializes_untagged() {
        let number: Timestamp = serde_json::from_str("1700000000123").unwrap();
        let text: Timestamp = serde_json::from_str("\"2023-11-14T22:13:20Z\"").unwrap();
        assert_eq!(number.as_millis(), Some(1_700_000_000_123));
        assert_eq!(text.as_millis(), Some(1_700_000_000_000));
    }
}
