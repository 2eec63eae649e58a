use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::{OccupancyRecord, StatusLevel, DATETIME_FORMAT};

/// Column order is a compatibility contract with downstream readers.
pub const HEADER: [&str; 11] = [
    "datetime",
    "date",
    "time",
    "hour",
    "weekday",
    "count",
    "status_label",
    "status_code",
    "status_min",
    "status_max",
    "raw_text",
];

#[derive(Debug, Serialize, Deserialize)]
struct DatasetRow {
    datetime: String,
    date: String,
    time: String,
    hour: u32,
    weekday: String,
    count: u32,
    status_label: String,
    status_code: u8,
    status_min: u32,
    status_max: u32,
    raw_text: String,
}

impl From<&OccupancyRecord> for DatasetRow {
    fn from(r: &OccupancyRecord) -> Self {
        let status = r.status();
        DatasetRow {
            datetime: r.timestamp().format(DATETIME_FORMAT).to_string(),
            date: r.date().format("%Y-%m-%d").to_string(),
            time: r.time_of_day(),
            hour: r.hour(),
            weekday: r.weekday(),
            count: r.count(),
            status_label: status.label.clone(),
            status_code: status.code,
            status_min: status.min,
            status_max: status.max,
            raw_text: r.raw_text().to_string(),
        }
    }
}

impl DatasetRow {
    /// Derived columns are recomputed from `datetime`, never trusted.
    fn into_record(self) -> Option<OccupancyRecord> {
        let timestamp = NaiveDateTime::parse_from_str(&self.datetime, DATETIME_FORMAT).ok()?;
        let status = StatusLevel {
            code: self.status_code,
            label: self.status_label,
            min: self.status_min,
            max: self.status_max,
        };
        Some(OccupancyRecord::new(timestamp, self.count, status, self.raw_text))
    }
}

/// What was found on disk before a merge.
#[derive(Debug)]
enum Loaded {
    Missing,
    Clean(Vec<OccupancyRecord>),
    /// Readable header, some rows dropped.
    Partial {
        records: Vec<OccupancyRecord>,
        skipped: usize,
    },
    /// Header missing or garbled; nothing usable.
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub added: usize,
    pub total: usize,
}

/// The on-disk dataset. Only this type writes the file.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    path: PathBuf,
    location: String,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>, location: impl Into<String>) -> Self {
        DatasetStore {
            path: path.into(),
            location: location.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable record. Missing or unreadable tables load as empty.
    pub fn load(&self) -> Result<Vec<OccupancyRecord>, StoreError> {
        Ok(match self.read_table()? {
            Loaded::Missing | Loaded::Corrupt(_) => Vec::new(),
            Loaded::Clean(records) | Loaded::Partial { records, .. } => records,
        })
    }

    /// Add the records not already stored and rewrite the table atomically.
    ///
    /// Dedup is by (timestamp, location, count), also within `new`. A corrupt
    /// table is moved aside first so the rewrite never destroys it.
    pub fn merge_and_persist(&self, new: &[OccupancyRecord]) -> Result<MergeOutcome, StoreError> {
        let (mut records, must_rewrite) = match self.read_table()? {
            Loaded::Missing => (Vec::new(), false),
            Loaded::Clean(records) => (records, false),
            Loaded::Partial { records, skipped } => {
                let copy = self.quarantine(false)?;
                warn!(skipped, copy = %copy.display(), "dataset had unreadable rows, kept a copy");
                (records, true)
            }
            Loaded::Corrupt(reason) => {
                let moved = self.quarantine(true)?;
                warn!(%reason, moved_to = %moved.display(), "dataset unreadable, starting fresh");
                (Vec::new(), true)
            }
        };

        let mut seen: HashSet<_> = records.iter().map(|r| r.key(&self.location)).collect();
        let before = records.len();
        for record in new {
            if seen.insert(record.key(&self.location)) {
                records.push(record.clone());
            }
        }
        let added = records.len() - before;

        if added == 0 && !must_rewrite {
            debug!(total = records.len(), "nothing new to persist");
            return Ok(MergeOutcome {
                added,
                total: records.len(),
            });
        }

        records.sort_by_key(|r| r.timestamp());
        self.write_atomic(&records)?;
        info!(added, total = records.len(), path = %self.path.display(), "dataset saved");
        Ok(MergeOutcome {
            added,
            total: records.len(),
        })
    }

    fn read_table(&self) -> Result<Loaded, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Loaded::Missing);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes.as_slice());
        let header_ok = match reader.headers() {
            Ok(h) => {
                h.len() == HEADER.len()
                    && h.iter()
                        .zip(HEADER)
                        .all(|(got, want)| got.trim_start_matches('\u{feff}').trim() == want)
            }
            Err(_) => false,
        };
        if !header_ok {
            let reason = "header does not match the dataset columns".to_string();
            warn!(path = %self.path.display(), "{}", reason);
            return Ok(Loaded::Corrupt(reason));
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (i, row) in reader.deserialize::<DatasetRow>().enumerate() {
            match row.map(DatasetRow::into_record) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    warn!(row = i + 1, "skipping dataset row with bad datetime");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(row = i + 1, error = %e, "skipping unreadable dataset row");
                    skipped += 1;
                }
            }
        }

        Ok(if skipped == 0 {
            Loaded::Clean(records)
        } else {
            Loaded::Partial { records, skipped }
        })
    }

    /// `<stem>.corrupt-<timestamp>.csv` next to the dataset. Moves the file
    /// when `take` is set, copies it otherwise.
    fn quarantine(&self, take: bool) -> Result<PathBuf, StoreError> {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let dir = self.parent_dir();

        let mut target = dir.join(format!("{stem}.corrupt-{stamp}.csv"));
        let mut n = 1;
        while target.exists() {
            target = dir.join(format!("{stem}.corrupt-{stamp}_{n}.csv"));
            n += 1;
        }

        let result = if take {
            fs::rename(&self.path, &target)
        } else {
            fs::copy(&self.path, &target).map(|_| ())
        };
        result.map_err(|e| StoreError::io(&target, e))?;
        Ok(target)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn write_atomic(&self, records: &[OccupancyRecord]) -> Result<(), StoreError> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file());
            writer.write_record(HEADER)?;
            for record in records {
                writer.serialize(DatasetRow::from(record))?;
            }
            writer.flush().map_err(|e| StoreError::io(tmp.path(), e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::status::StatusTable;
    use tempfile::tempdir;

    fn record(ts: &str, count: u32) -> OccupancyRecord {
        let timestamp = NaiveDateTime::parse_from_str(ts, DATETIME_FORMAT).unwrap();
        let status = StatusTable::default().classify(count, "");
        OccupancyRecord::new(timestamp, count, status, format!("混雑状況 {count}人"))
    }

    fn store_in(dir: &Path) -> DatasetStore {
        DatasetStore::new(dir.join("data").join("gym.csv"), "矢向")
    }

    fn quarantined(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupt-"))
            .collect()
    }

    #[test]
    fn missing_and_empty_files_load_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load().unwrap().is_empty());

        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "\n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let batch = vec![record("2025-08-04 08:30:00", 15)];

        let first = store.merge_and_persist(&batch).unwrap();
        assert_eq!(first, MergeOutcome { added: 1, total: 1 });
        let bytes = fs::read(store.path()).unwrap();

        let second = store.merge_and_persist(&batch).unwrap();
        assert_eq!(second, MergeOutcome { added: 0, total: 1 });
        assert_eq!(fs::read(store.path()).unwrap(), bytes);
    }

    #[test]
    fn duplicates_inside_one_batch_collapse() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let r = record("2025-08-04 08:30:00", 15);
        let out = store.merge_and_persist(&[r.clone(), r]).unwrap();
        assert_eq!(out, MergeOutcome { added: 1, total: 1 });
    }

    #[test]
    fn same_time_different_count_is_distinct() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let out = store
            .merge_and_persist(&[record("2025-08-04 08:30:00", 15), record("2025-08-04 08:30:00", 16)])
            .unwrap();
        assert_eq!(out.added, 2);
    }

    #[test]
    fn persisted_sorted_and_reloadable() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let batch = vec![
            record("2025-08-05 19:00:00", 33),
            record("2025-08-04 08:30:00", 15),
            record("2025-08-04 12:00:00", 25),
        ];
        store.merge_and_persist(&batch).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), HEADER.join(","));
        assert!(lines.next().unwrap().starts_with("2025-08-04 08:30:00,2025-08-04,08:30,8,Monday,15,"));

        let loaded = store.load().unwrap();
        let stamps: Vec<_> = loaded.iter().map(|r| r.timestamp()).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);

        let mut expected = batch.clone();
        expected.sort_by_key(|r| r.timestamp());
        assert_eq!(loaded, expected);
    }

    #[test]
    fn sequential_disjoint_merges_accumulate() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let a = store
            .merge_and_persist(&[record("2025-08-04 08:30:00", 15), record("2025-08-04 12:00:00", 25)])
            .unwrap();
        let b = store
            .merge_and_persist(&[record("2025-08-03 07:00:00", 4), record("2025-08-04 12:00:00", 25)])
            .unwrap();
        assert_eq!(a, MergeOutcome { added: 2, total: 2 });
        assert_eq!(b, MergeOutcome { added: 1, total: 3 });
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn garbled_header_quarantined() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let data_dir = store.path().parent().unwrap().to_path_buf();
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(store.path(), "when,people\n2025-08-04,15\n").unwrap();

        assert!(store.load().unwrap().is_empty());
        let out = store.merge_and_persist(&[record("2025-08-04 08:30:00", 15)]).unwrap();
        assert_eq!(out, MergeOutcome { added: 1, total: 1 });

        let moved = quarantined(&data_dir);
        assert_eq!(moved.len(), 1);
        assert_eq!(fs::read_to_string(&moved[0]).unwrap(), "when,people\n2025-08-04,15\n");
    }

    #[test]
    fn bad_rows_skipped_and_copied_aside() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.merge_and_persist(&[record("2025-08-04 08:30:00", 15)]).unwrap();

        let mut text = fs::read_to_string(store.path()).unwrap();
        text.push_str("not a date,x,y,z\n");
        fs::write(store.path(), &text).unwrap();

        assert_eq!(store.load().unwrap().len(), 1);
        let out = store.merge_and_persist(&[]).unwrap();
        assert_eq!(out, MergeOutcome { added: 0, total: 1 });
        assert_eq!(quarantined(store.path().parent().unwrap()).len(), 1);
        assert!(!fs::read_to_string(store.path()).unwrap().contains("not a date"));
    }

    #[test]
    fn bom_in_header_accepted() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.merge_and_persist(&[record("2025-08-04 08:30:00", 15)]).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), format!("\u{feff}{text}")).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn raw_text_with_commas_and_quotes_survives() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let ts = NaiveDateTime::parse_from_str("2025-08-04 08:30:00", DATETIME_FORMAT).unwrap();
        let r = OccupancyRecord::new(
            ts,
            15,
            StatusTable::default().classify(15, ""),
            "a, \"b\"\nc".to_string(),
        );
        store.merge_and_persist(std::slice::from_ref(&r)).unwrap();
        assert_eq!(store.load().unwrap(), vec![r]);
    }
}
