use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::analysis::{self, HourlySummary};
use crate::backup::BackupDir;
use crate::config::{AnalysisSettings, Settings};
use crate::error::{PipelineError, StoreError};
use crate::inbox::Inbox;
use crate::parser::Extractor;
use crate::reconcile::{remove_spans, ConsumptionSpan};
use crate::record::OccupancyRecord;
use crate::source::TextSource;
use crate::store::{DatasetStore, MergeOutcome};

/// What happened to the source after the merge. Never affects run success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CleanupOutcome {
    NotRequested,
    NothingToRemove,
    /// Cleanup was not attempted; the source is untouched.
    Skipped { reason: String },
    Applied { spans: usize, backup: PathBuf },
    /// Backup exists but writing the edited text back failed.
    Failed { reason: String, backup: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub extracted: usize,
    pub added: usize,
    pub total: usize,
    pub cleanup: CleanupOutcome,
    pub analysis: Option<HourlySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxReport {
    pub found: bool,
    pub read: usize,
    pub added: usize,
    pub total: usize,
    pub archived: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Preview {
    pub records: Vec<OccupancyRecord>,
    pub spans: Vec<ConsumptionSpan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub source: String,
    /// Characters fetched, or the fetch error.
    pub source_status: Result<usize, String>,
    pub dataset: PathBuf,
    /// Row count, `None` when the file does not exist yet.
    pub dataset_rows: Result<Option<usize>, String>,
    pub dataset_dir_writable: bool,
    pub backup_dir: PathBuf,
    pub backup_dir_writable: bool,
}

/// fetch → extract → merge → reconcile → analyze.
pub struct Pipeline {
    extractor: Extractor,
    store: DatasetStore,
    backups: BackupDir,
    analysis: AnalysisSettings,
    max_raw_chars: usize,
}

impl Pipeline {
    pub fn from_settings(settings: &Settings) -> Result<Self, regex::Error> {
        Ok(Pipeline {
            extractor: Extractor::new(&settings.extract)?,
            store: DatasetStore::new(&settings.paths.dataset, settings.venue.location.clone()),
            backups: BackupDir::new(&settings.paths.backup_dir),
            analysis: settings.analysis.clone(),
            max_raw_chars: settings.extract.max_raw_chars,
        })
    }

    #[cfg(test)]
    fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Only fetch and merge failures fail the run. Cleanup and analysis
    /// problems are logged and reported in the returned [`RunReport`].
    pub fn run(
        &self,
        source: &dyn TextSource,
        cleanup: bool,
        now: NaiveDateTime,
    ) -> Result<RunReport, PipelineError> {
        let name = source.describe();

        info!(source = %name, "fetching");
        let raw = source.fetch().map_err(|e| {
            error!(source = %name, error = %e, "fetch failed, nothing written");
            e
        })?;

        let extraction = self.extractor.extract_on(&raw, now.date());
        info!(
            chars = raw.chars().count(),
            records = extraction.records.len(),
            "extracted"
        );

        if extraction.is_empty() {
            info!("no new data");
            let merged = self.store.merge_and_persist(&[])?;
            return Ok(RunReport {
                source: name,
                extracted: 0,
                added: 0,
                total: merged.total,
                cleanup: if cleanup {
                    CleanupOutcome::NothingToRemove
                } else {
                    CleanupOutcome::NotRequested
                },
                analysis: None,
            });
        }

        let merged: MergeOutcome = self.store.merge_and_persist(&extraction.records).map_err(|e| {
            error!(error = %e, "dataset update failed");
            e
        })?;
        info!(added = merged.added, total = merged.total, "merged");

        let cleanup = if cleanup {
            self.reconcile(source, &raw, &extraction.spans, now)
        } else {
            CleanupOutcome::NotRequested
        };

        Ok(RunReport {
            source: name,
            extracted: extraction.records.len(),
            added: merged.added,
            total: merged.total,
            cleanup,
            analysis: self.analyze_best_effort(),
        })
    }

    fn reconcile(
        &self,
        source: &dyn TextSource,
        raw: &str,
        spans: &[ConsumptionSpan],
        now: NaiveDateTime,
    ) -> CleanupOutcome {
        if spans.is_empty() {
            return CleanupOutcome::NothingToRemove;
        }

        let backup = match self.backups.save_text(raw, now) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "backup failed, leaving source untouched");
                return CleanupOutcome::Skipped {
                    reason: format!("backup failed: {e}"),
                };
            }
        };

        // Reports appended after our fetch would be lost by the replace.
        match source.fetch() {
            Ok(current) if current == raw => {}
            Ok(_) => {
                warn!("source changed since fetch, cleanup deferred to the next run");
                return CleanupOutcome::Skipped {
                    reason: "source changed since fetch".into(),
                };
            }
            Err(e) => {
                warn!(error = %e, "could not re-read source, leaving it untouched");
                return CleanupOutcome::Skipped {
                    reason: format!("re-fetch failed: {e}"),
                };
            }
        }

        let cleaned = remove_spans(raw, spans);
        if cleaned.removed == 0 {
            warn!(spans = spans.len(), "no consumed report found in source, leaving it untouched");
            return CleanupOutcome::Skipped {
                reason: "no consumed report found in source".into(),
            };
        }
        if cleaned.removed < spans.len() {
            warn!(
                removed = cleaned.removed,
                spans = spans.len(),
                "some consumed reports were not found in source"
            );
        }
        match source.replace(&cleaned.text) {
            Ok(()) => {
                info!(removed = cleaned.removed, backup = %backup.display(), "source cleaned");
                CleanupOutcome::Applied {
                    spans: cleaned.removed,
                    backup,
                }
            }
            Err(e) => {
                warn!(error = %e, backup = %backup.display(), "source update failed");
                CleanupOutcome::Failed {
                    reason: e.to_string(),
                    backup,
                }
            }
        }
    }

    fn analyze_best_effort(&self) -> Option<HourlySummary> {
        match self.analyze() {
            Ok(summary) => {
                analysis::log_summary(&summary);
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "analysis skipped");
                None
            }
        }
    }

    pub fn analyze(&self) -> Result<HourlySummary, StoreError> {
        let records = self.store.load()?;
        Ok(analysis::summarize(&records, &self.analysis))
    }

    /// Merge the structured inbox, then move it into the backup directory.
    pub fn ingest_inbox(&self, inbox: &Inbox, now: NaiveDateTime) -> Result<InboxReport, PipelineError> {
        let Some(records) = inbox.read(self.extractor.status_table(), now, self.max_raw_chars)? else {
            return Ok(InboxReport {
                found: false,
                read: 0,
                added: 0,
                total: 0,
                archived: None,
            });
        };

        let merged = self.store.merge_and_persist(&records)?;
        info!(read = records.len(), added = merged.added, total = merged.total, "inbox merged");

        let archived = match inbox.archive(&self.backups, now) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, path = %inbox.path().display(), "inbox left in place");
                None
            }
        };
        self.analyze_best_effort();

        Ok(InboxReport {
            found: true,
            read: records.len(),
            added: merged.added,
            total: merged.total,
            archived,
        })
    }

    /// Fetch and extract only.
    pub fn preview(&self, source: &dyn TextSource, now: NaiveDateTime) -> Result<Preview, PipelineError> {
        let raw = source.fetch()?;
        let extraction = self.extractor.extract_on(&raw, now.date());
        Ok(Preview {
            records: extraction.records,
            spans: extraction.spans,
        })
    }

    pub fn diagnose(&self, source: &dyn TextSource) -> Diagnostics {
        let source_status = source
            .fetch()
            .map(|text| text.chars().count())
            .map_err(|e| e.to_string());

        let dataset = self.store.path().to_path_buf();
        let dataset_rows = if dataset.exists() {
            self.store.load().map(|r| Some(r.len())).map_err(|e| e.to_string())
        } else {
            Ok(None)
        };
        let dataset_dir = match dataset.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Diagnostics {
            source: source.describe(),
            source_status,
            dataset_dir_writable: writable(&dataset_dir),
            dataset,
            dataset_rows,
            backup_dir: self.backups.path().to_path_buf(),
            backup_dir_writable: writable(self.backups.path()),
        }
    }
}

fn writable(dir: &Path) -> bool {
    fs::create_dir_all(dir).is_ok() && tempfile::tempfile_in(dir).is_ok()
}

// ── Tests ──
