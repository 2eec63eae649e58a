use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::AnalysisSettings;
use crate::record::OccupancyRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourStats {
    pub hour: u32,
    pub samples: usize,
    pub mean: f64,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HourlySummary {
    pub total_records: usize,
    /// Ascending by hour, only hours with data.
    pub hours: Vec<HourStats>,
    /// Emptiest first.
    pub quiet: Vec<HourStats>,
    /// Busiest first.
    pub busy: Vec<HourStats>,
}

pub fn summarize(records: &[OccupancyRecord], settings: &AnalysisSettings) -> HourlySummary {
    let mut by_hour: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for r in records {
        by_hour.entry(r.hour()).or_default().push(r.count());
    }

    let hours: Vec<HourStats> = by_hour
        .into_iter()
        .map(|(hour, counts)| {
            let sum: u64 = counts.iter().map(|&c| u64::from(c)).sum();
            HourStats {
                hour,
                samples: counts.len(),
                mean: sum as f64 / counts.len() as f64,
                min: counts.iter().copied().min().unwrap_or(0),
                max: counts.iter().copied().max().unwrap_or(0),
            }
        })
        .collect();

    let mut quiet: Vec<HourStats> = hours
        .iter()
        .filter(|h| h.mean <= settings.quiet_threshold)
        .cloned()
        .collect();
    quiet.sort_by(|a, b| a.mean.total_cmp(&b.mean));

    let mut busy: Vec<HourStats> = hours
        .iter()
        .filter(|h| h.mean >= settings.busy_threshold)
        .cloned()
        .collect();
    busy.sort_by(|a, b| b.mean.total_cmp(&a.mean));

    HourlySummary {
        total_records: records.len(),
        hours,
        quiet,
        busy,
    }
}

pub fn log_summary(summary: &HourlySummary) {
    if summary.total_records == 0 {
        info!("no data to analyze");
        return;
    }
    info!(records = summary.total_records, hours = summary.hours.len(), "hourly analysis");
    for h in &summary.quiet {
        info!("quiet  {:2}:00  mean {:.1} ({} samples)", h.hour, h.mean, h.samples);
    }
    for h in &summary.busy {
        info!("busy   {:2}:00  mean {:.1} ({} samples)", h.hour, h.mean, h.samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::status::StatusTable;
    use chrono::NaiveDateTime;

    fn record(ts: &str, count: u32) -> OccupancyRecord {
        let ts = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap();
        OccupancyRecord::new(ts, count, StatusTable::default().classify(count, ""), String::new())
    }

    #[test]
    fn per_hour_aggregates() {
        let records = vec![
            record("2025-08-04 08:10:00", 10),
            record("2025-08-05 08:40:00", 14),
            record("2025-08-04 12:00:00", 25),
            record("2025-08-04 19:00:00", 35),
            record("2025-08-05 19:30:00", 29),
            record("2025-08-05 21:00:00", 5),
        ];
        let s = summarize(&records, &AnalysisSettings::default());
        assert_eq!(s.total_records, 6);
        assert_eq!(s.hours.iter().map(|h| h.hour).collect::<Vec<_>>(), vec![8, 12, 19, 21]);

        let eight = &s.hours[0];
        assert_eq!((eight.samples, eight.min, eight.max), (2, 10, 14));
        assert!((eight.mean - 12.0).abs() < 1e-9);

        assert_eq!(s.quiet.iter().map(|h| h.hour).collect::<Vec<_>>(), vec![21, 8]);
        assert_eq!(s.busy.iter().map(|h| h.hour).collect::<Vec<_>>(), vec![19, 12]);
    }

    #[test]
    fn empty_dataset() {
        let s = summarize(&[], &AnalysisSettings::default());
        assert_eq!(s, HourlySummary::default());
    }
}
