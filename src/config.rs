//! Crawl and download configuration.
//!
//! One typed struct passed explicitly into each orchestrator and pipeline
//! instance at construction - there is no process-wide mutable
//! configuration state. Loaded from a JSON file with serde defaults so a
//! partial file stays valid across versions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised before any work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range description.
        expected: &'static str,
    },

    /// The run has nothing to do.
    #[error("no profile selected and no start URL configured")]
    NothingToDo,
}

/// Runtime configuration for a crawl + download run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seed URLs; empty falls back to each profile's start URL.
    pub start_urls: Vec<String>,
    /// Active profile names, processed in fixed rotation.
    pub profiles: Vec<String>,
    /// Base delay between page fetches in milliseconds (jittered).
    pub page_delay_ms: u64,
    /// Scroll increments per page.
    pub scroll_steps: u32,
    /// Base delay between scroll increments in milliseconds.
    pub scroll_delay_ms: u64,
    /// Settle wait after triggering players, in milliseconds.
    pub settle_ms: u64,
    /// Page navigation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum catalog depth; item links are not depth-limited.
    pub max_depth: i64,
    /// Maximum pages per run; 0 disables the bound.
    pub max_pages: u64,
    /// Pages processed per profile before rotating.
    pub batch_size: u32,
    /// Run the browser headless.
    pub headless: bool,
    /// Skip pages recorded `done` on earlier runs.
    pub resume: bool,
    /// Only attribute stream candidates embedding the current asset id;
    /// tunable because differently laid-out sites mis-attribute otherwise.
    pub strict_capture: bool,
    /// Directory downloads land in.
    pub output_dir: PathBuf,
    /// Concurrent download jobs.
    pub concurrency: usize,
    /// Maximum retries per transient-failing download.
    pub max_retries: u32,
    /// Filename template; tokens: {title} {asset_id} {creator}
    /// {collection} {resolution}.
    pub filename_template: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            profiles: vec!["artlist".to_string()],
            page_delay_ms: 2500,
            scroll_steps: 15,
            scroll_delay_ms: 800,
            settle_ms: 4000,
            timeout_ms: 30_000,
            max_depth: 2,
            max_pages: 0,
            batch_size: 50,
            headless: true,
            resume: true,
            strict_capture: true,
            output_dir: PathBuf::from("archive"),
            concurrency: 2,
            max_retries: 3,
            filename_template: "{title}".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults for
    /// absent fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] / [`ConfigError::Parse`] on failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Loads the file when it exists, otherwise returns defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if an existing file is malformed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validates value ranges and that the run has work to do.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] or [`ConfigError::NothingToDo`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.is_empty() && self.start_urls.is_empty() {
            return Err(ConfigError::NothingToDo);
        }
        if !(1..=16).contains(&self.concurrency) {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                value: self.concurrency.to_string(),
                expected: "range 1..=16",
            });
        }
        if self.max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries",
                value: self.max_retries.to_string(),
                expected: "range 0..=10",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                value: "0".to_string(),
                expected: "at least 1",
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_ms",
                value: "0".to_string(),
                expected: "a positive duration",
            });
        }
        Ok(())
    }
}
