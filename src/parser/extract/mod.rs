pub mod inline;
pub mod stacked;

use chrono::{Datelike, NaiveDate, NaiveTime};
use tracing::{debug, warn};

use super::status::StatusTable;
use crate::reconcile::ConsumptionSpan;
use crate::record::{truncate_chars, OccupancyRecord};

/// Fields captured by one of the layouts, not yet validated.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub count: String,
    pub status: String,
    pub hour: String,
    pub minute: String,
    /// Explicit (month, day) when the report carried one.
    pub date: Option<(String, String)>,
    pub raw: String,
    pub span: ConsumptionSpan,
}

impl Candidate {
    /// Validate and build the record. `None` drops the candidate; it is never
    /// an error for the batch.
    pub fn resolve(
        self,
        table: &StatusTable,
        today: NaiveDate,
        max_raw_chars: usize,
    ) -> Option<(OccupancyRecord, ConsumptionSpan)> {
        let Ok(count) = self.count.parse::<u32>() else {
            debug!(count = %self.count, "skipping report with unparsable count");
            return None;
        };

        let time = match (self.hour.parse::<u32>(), self.minute.parse::<u32>()) {
            (Ok(h), Ok(m)) => NaiveTime::from_hms_opt(h, m, 0),
            _ => None,
        };
        let Some(time) = time else {
            warn!(hour = %self.hour, minute = %self.minute, "skipping report with invalid time");
            return None;
        };

        let date = match &self.date {
            Some((month, day)) => explicit_date(today, month, day).unwrap_or_else(|| {
                debug!(%month, %day, "unreadable report date, using today");
                today
            }),
            None => today,
        };

        let status = table.classify(count, &self.status);
        let raw = truncate_chars(&self.raw, max_raw_chars);
        let record = OccupancyRecord::new(date.and_time(time), count, status, raw);
        Some((record, self.span))
    }
}

fn explicit_date(today: NaiveDate, month: &str, day: &str) -> Option<NaiveDate> {
    let month = month.parse::<u32>().ok()?;
    let day = day.parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(today.year(), month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(count: &str, hour: &str, minute: &str, date: Option<(&str, &str)>) -> Candidate {
        Candidate {
            count: count.into(),
            status: "やや空いています".into(),
            hour: hour.into(),
            minute: minute.into(),
            date: date.map(|(m, d)| (m.into(), d.into())),
            raw: "混雑状況 15人 やや空いています 08:30時点".into(),
            span: ConsumptionSpan::Lines(vec![0]),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()
    }

    #[test]
    fn valid_candidate_resolves() {
        let (r, _) = candidate("15", "8", "30", None)
            .resolve(&StatusTable::default(), today(), 200)
            .unwrap();
        assert_eq!(r.count(), 15);
        assert_eq!(r.hour(), 8);
        assert_eq!(r.time_of_day(), "08:30");
        assert_eq!(r.date(), today());
        assert_eq!(r.status().code, 4);
    }

    #[test]
    fn out_of_range_time_rejected() {
        let table = StatusTable::default();
        assert!(candidate("15", "24", "00", None).resolve(&table, today(), 200).is_none());
        assert!(candidate("15", "08", "60", None).resolve(&table, today(), 200).is_none());
        assert!(candidate("15", "23", "59", None).resolve(&table, today(), 200).is_some());
    }

    #[test]
    fn overflowing_count_rejected() {
        let c = candidate("99999999999999999999", "8", "30", None);
        assert!(c.resolve(&StatusTable::default(), today(), 200).is_none());
    }

    #[test]
    fn explicit_date_uses_current_year() {
        let (r, _) = candidate("15", "8", "30", Some(("08", "04")))
            .resolve(&StatusTable::default(), today(), 200)
            .unwrap();
        assert_eq!(r.date(), NaiveDate::from_ymd_opt(2025, 8, 4).unwrap());
    }

    #[test]
    fn impossible_date_falls_back_to_today() {
        let (r, _) = candidate("15", "8", "30", Some(("02", "30")))
            .resolve(&StatusTable::default(), today(), 200)
            .unwrap();
        assert_eq!(r.date(), today());
    }

    #[test]
    fn raw_text_capped() {
        let (r, _) = candidate("15", "8", "30", None)
            .resolve(&StatusTable::default(), today(), 4)
            .unwrap();
        assert_eq!(r.raw_text(), "混雑状況");
    }
}
