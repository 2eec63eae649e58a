use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures talking to the raw text source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no {0} command configured")]
    NotConfigured(&'static str),
    #[error("failed to run `{program}`: {source}")]
    Command {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("source returned no content")]
    Empty,
}

/// Failures reading or rewriting the dataset table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("dataset CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to move new dataset into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Run-level failures. Cleanup and analysis problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),
    #[error("dataset update failed: {0}")]
    Persist(#[from] StoreError),
}
