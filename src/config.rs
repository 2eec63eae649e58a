use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::parser::status::StatusTableKind;

const DEFAULT_CONFIG_STEM: &str = "gym_crowd";
const ENV_PREFIX: &str = "GYM_CROWD";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub venue: VenueSettings,
    pub source: SourceSettings,
    pub extract: ExtractSettings,
    pub analysis: AnalysisSettings,
    pub inbox: InboxSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub dataset: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        PathSettings {
            dataset: PathBuf::from("data/fit_place24_data.csv"),
            backup_dir: PathBuf::from("backups"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VenueSettings {
    /// Part of the dedup identity; the table itself has no location column.
    pub location: String,
}

impl Default for VenueSettings {
    fn default() -> Self {
        VenueSettings {
            location: "矢向".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    File,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Text or HTML export read by the `file` source.
    pub path: PathBuf,
    /// argv printing the source text on stdout.
    pub fetch_command: Vec<String>,
    /// argv receiving the edited text on stdin.
    pub replace_command: Vec<String>,
    pub timeout_secs: u64,
}

impl SourceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            kind: SourceKind::File,
            path: PathBuf::from("memo.txt"),
            fetch_command: Vec::new(),
            replace_command: Vec::new(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    /// Keywords opening a report. OCR sometimes yields the variant 雜.
    pub markers: Vec<String>,
    pub max_raw_chars: usize,
    pub status_table: StatusTableKind,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        ExtractSettings {
            markers: vec!["混雑状況".to_string(), "混雜状況".to_string()],
            max_raw_chars: 200,
            status_table: StatusTableKind::Standard,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub quiet_threshold: f64,
    pub busy_threshold: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            quiet_threshold: 15.0,
            busy_threshold: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InboxSettings {
    pub path: PathBuf,
    pub max_age_days: i64,
}

impl Default for InboxSettings {
    fn default() -> Self {
        InboxSettings {
            path: PathBuf::from("inbox.csv"),
            max_age_days: 7,
        }
    }
}

impl Settings {
    /// Defaults, then `gym_crowd.toml` (or `explicit`), then `GYM_CROWD_*`
    /// environment overrides such as `GYM_CROWD_PATHS__DATASET`.
    pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
        let file = match explicit {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_STEM).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extract.markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "extract.markers",
                reason: "at least one non-empty marker is required".into(),
            });
        }
        if self.extract.max_raw_chars == 0 {
            return Err(ConfigError::Invalid {
                key: "extract.max_raw_chars",
                reason: "must be positive".into(),
            });
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "source.timeout_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
