use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One congestion level from the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLevel {
    pub code: u8,
    pub label: String,
    pub min: u32,
    pub max: u32,
}

/// A single observation of how many people were at the venue.
///
/// Date, time of day, hour and weekday are always derived from `timestamp`,
/// so they cannot drift from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyRecord {
    timestamp: NaiveDateTime,
    count: u32,
    status: StatusLevel,
    raw_text: String,
}

/// Deduplication identity: (timestamp, location, count).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub count: u32,
}

impl OccupancyRecord {
    pub fn new(timestamp: NaiveDateTime, count: u32, status: StatusLevel, raw_text: String) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        OccupancyRecord {
            timestamp,
            count,
            status,
            raw_text,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time_of_day(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    pub fn weekday(&self) -> String {
        self.timestamp.format("%A").to_string()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn status(&self) -> &StatusLevel {
        &self.status
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn key(&self, location: &str) -> RecordKey {
        RecordKey {
            timestamp: self.timestamp,
            location: location.to_string(),
            count: self.count,
        }
    }
}

/// Cut `s` to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> StatusLevel {
        StatusLevel {
            code: 4,
            label: "やや空いています（~20人）".into(),
            min: 11,
            max: 20,
        }
    }

    #[test]
    fn derived_fields_follow_timestamp() {
        let ts = NaiveDateTime::parse_from_str("2025-08-04 08:30:00", DATETIME_FORMAT).unwrap();
        let r = OccupancyRecord::new(ts, 15, level(), "raw".into());
        assert_eq!(r.hour(), 8);
        assert_eq!(r.time_of_day(), "08:30");
        assert_eq!(r.weekday(), "Monday");
        assert_eq!(r.date().to_string(), "2025-08-04");
    }

    #[test]
    fn sub_second_precision_dropped() {
        let ts = NaiveDateTime::parse_from_str("2025-08-04 08:30:00.750", "%Y-%m-%d %H:%M:%S%.f")
            .unwrap();
        let r = OccupancyRecord::new(ts, 15, level(), String::new());
        assert_eq!(r.timestamp().nanosecond(), 0);
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("混雑状況 15人", 4), "混雑状況");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
