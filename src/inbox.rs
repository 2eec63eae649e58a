use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDateTime};
use regex::Regex;
use tracing::{info, warn};

use crate::backup::BackupDir;
use crate::error::SourceError;
use crate::parser::status::StatusTable;
use crate::record::{truncate_chars, OccupancyRecord, DATETIME_FORMAT};

static PEOPLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]{1,3})").unwrap());

/// source, ts_local, people, status, location, device, raw
const INBOX_COLUMNS: usize = 7;

/// Headerless CSV dropped by a phone shortcut, one report per row.
#[derive(Debug, Clone)]
pub struct Inbox {
    path: PathBuf,
    max_age_days: i64,
}

impl Inbox {
    pub fn new(path: impl Into<PathBuf>, max_age_days: i64) -> Self {
        Inbox {
            path: path.into(),
            max_age_days,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when there is no inbox file.
    pub fn read(
        &self,
        table: &StatusTable,
        now: NaiveDateTime,
        max_raw_chars: usize,
    ) -> Result<Option<Vec<OccupancyRecord>>, SourceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no inbox file");
                return Ok(None);
            }
            Err(source) => {
                return Err(SourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let line = i + 1;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(line, error = %e, "skipping unreadable inbox row");
                    continue;
                }
            };
            if row.len() < INBOX_COLUMNS {
                warn!(line, columns = row.len(), "inbox row has too few columns");
                continue;
            }
            if let Some(record) = self.convert(&row, line, table, now, max_raw_chars) {
                records.push(record);
            }
        }
        info!(records = records.len(), path = %self.path.display(), "inbox read");
        Ok(Some(records))
    }

    fn convert(
        &self,
        row: &csv::StringRecord,
        line: usize,
        table: &StatusTable,
        now: NaiveDateTime,
        max_raw_chars: usize,
    ) -> Option<OccupancyRecord> {
        let field = |i: usize| row.get(i).unwrap_or("").trim();

        let Some(mut ts) = parse_local_time(field(1)) else {
            warn!(line, ts = field(1), "inbox row has unreadable timestamp");
            return None;
        };
        if ts > now {
            ts -= Duration::days(1);
            info!(line, %ts, "future timestamp read as the previous day");
        }
        if (now - ts).num_days() > self.max_age_days {
            warn!(line, %ts, "inbox row too old, skipping");
            return None;
        }

        let count = PEOPLE_RE
            .captures(field(2))
            .and_then(|c| c[1].parse::<u32>().ok())?;

        let status = table.classify(count, field(3));
        let raw = truncate_chars(field(6), max_raw_chars);
        Some(OccupancyRecord::new(ts, count, status, raw))
    }

    pub fn archive(&self, backups: &BackupDir, now: NaiveDateTime) -> io::Result<PathBuf> {
        backups.archive_file(&self.path, "inbox", "csv", now)
    }
}

/// RFC 3339 keeps its wall-clock time and drops the offset.
fn parse_local_time(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S", DATETIME_FORMAT]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}
