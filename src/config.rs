//! Configuration surface for the picker.
//!
//! Every knob is optional with a sensible default, so
//! `FilePicker::new(PickerConfig::default())` indexes the current
//! directory with frecency kept in memory only.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log verbosity accepted by [`crate::log::init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(Error::TracingInit(format!(
                "unknown log level: {}. Valid options: error, warn, info, debug, trace",
                s
            ))),
        }
    }
}

/// Frecency persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrecencyConfig {
    /// Whether access tracking contributes to ranking at all.
    pub enabled: bool,
    /// Directory for the embedded database. `None` keeps frecency
    /// in memory for the lifetime of the picker.
    pub db_path: Option<PathBuf>,
}

impl Default for FrecencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
        }
    }
}

/// File logging settings, consumed by [`crate::log::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
}

/// Configuration for a [`crate::picker::FilePicker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickerConfig {
    /// Root directory to index. Defaults to the caller's cwd.
    pub base_path: Option<PathBuf>,
    /// Upper bound on returned results per query.
    pub max_results: usize,
    /// Worker pool size for scanning and scoring.
    pub max_threads: usize,
    pub frecency: FrecencyConfig,
    pub logging: LoggingConfig,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            max_results: 100,
            max_threads: 4,
            frecency: FrecencyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PickerConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: Some(base_path.into()),
            ..Default::default()
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    pub fn with_frecency_db(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.frecency.db_path = Some(db_path.into());
        self
    }

    pub fn without_frecency(mut self) -> Self {
        self.frecency.enabled = false;
        self
    }

    /// The base path to index, falling back to the current directory.
    pub fn resolved_base(&self) -> Result<PathBuf> {
        match &self.base_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_dir()
                .map_err(|_| Error::InvalidBase(PathBuf::from("."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PickerConfig::default();
        assert_eq!(config.max_results, 100);
        assert_eq!(config.max_threads, 4);
        assert!(config.frecency.enabled);
        assert!(config.frecency.db_path.is_none());
        assert!(!config.logging.enabled);
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn builders_compose() {
        let config = PickerConfig::new("/tmp/project")
            .with_max_results(10)
            .with_max_threads(0)
            .with_frecency_db("/tmp/db");
        assert_eq!(config.base_path.as_deref(), Some(std::path::Path::new("/tmp/project")));
        assert_eq!(config.max_results, 10);
        assert_eq!(config.max_threads, 1, "thread count is clamped to at least one");
        assert!(config.frecency.db_path.is_some());
    }
}
