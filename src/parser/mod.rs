pub mod extract;
pub mod lines;
pub mod status;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::ExtractSettings;
use crate::reconcile::ConsumptionSpan;
use crate::record::OccupancyRecord;
use extract::inline::InlineMatcher;
use extract::{stacked, Candidate};
use status::StatusTable;

/// Records found in one source text. `spans[i]` is the region `records[i]`
/// was read from.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<OccupancyRecord>,
    pub spans: Vec<ConsumptionSpan>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: OccupancyRecord, span: ConsumptionSpan) {
        self.records.push(record);
        self.spans.push(span);
    }
}

/// Two-pass extraction: raw text → prepared lines → validated records.
#[derive(Debug, Clone)]
pub struct Extractor {
    markers: Vec<String>,
    inline: InlineMatcher,
    table: StatusTable,
    max_raw_chars: usize,
}

impl Extractor {
    pub fn new(settings: &ExtractSettings) -> Result<Self, regex::Error> {
        let markers: Vec<String> = settings
            .markers
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        Ok(Extractor {
            inline: InlineMatcher::new(&markers)?,
            markers,
            table: StatusTable::for_kind(settings.status_table),
            max_raw_chars: settings.max_raw_chars,
        })
    }

    pub fn status_table(&self) -> &StatusTable {
        &self.table
    }

    /// `today` dates the reports that carry no explicit date.
    pub fn extract_on(&self, raw: &str, today: NaiveDate) -> Extraction {
        let lines = lines::prepare_lines(raw);
        let mut out = Extraction::default();
        let mut rejected = 0usize;
        let mut i = 0;

        while i < lines.len() {
            let line = &lines[i];
            if !self.has_marker(&line.text) {
                i += 1;
                continue;
            }

            // A line holding a complete report never starts a stacked one.
            let inline = self.inline.scan(line);
            if !inline.is_empty() {
                for candidate in inline {
                    if !self.accept(candidate, today, &mut out) {
                        rejected += 1;
                    }
                }
                i += 1;
                continue;
            }

            match stacked::scan(&lines, i, |t| self.has_marker(t)) {
                Some((candidate, consumed)) => {
                    if self.accept(candidate, today, &mut out) {
                        i += consumed;
                    } else {
                        rejected += 1;
                        i += 1;
                    }
                }
                None => i += 1,
            }
        }

        debug!(
            lines = lines.len(),
            records = out.records.len(),
            rejected,
            "extraction finished"
        );
        out
    }

    fn has_marker(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }

    fn accept(&self, candidate: Candidate, today: NaiveDate, out: &mut Extraction) -> bool {
        match candidate.resolve(&self.table, today, self.max_raw_chars) {
            Some((record, span)) => {
                out.push(record, span);
                true
            }
            None => false,
        }
    }
}

// ── Tests ──
