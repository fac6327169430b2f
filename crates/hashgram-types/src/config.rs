//! Configuration loading for hashgram.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/hashgram/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HashgramError;

/// What the pipeline does with a record that has no usable hash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Count the record as skipped and keep streaming (default)
    #[default]
    Skip,
    /// Stop the run; the checkpoint stays before the offending record
    Abort,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(MalformedPolicy::Skip),
            "abort" => Ok(MalformedPolicy::Abort),
            other => Err(format!("unknown malformed policy '{}' (expected skip or abort)", other)),
        }
    }
}

impl std::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedPolicy::Skip => write!(f, "skip"),
            MalformedPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Settings for the n-gram indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    /// N-gram length `k`
    #[serde(default = "default_ngram_length")]
    pub ngram_length: usize,

    /// Maximum postings per write batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries after the first failed attempt of a batch write
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval in milliseconds; doubles per retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff interval in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Records between progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Number of disjoint id-range partitions indexed concurrently
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Policy for records without a usable hash
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,

    /// Records fetched per storage seek by the record source
    #[serde(default = "default_source_page_size")]
    pub source_page_size: usize,
}

fn default_ngram_length() -> usize {
    4
}

fn default_batch_size() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_progress_interval() -> u64 {
    100_000
}

fn default_partitions() -> usize {
    1
}

fn default_source_page_size() -> usize {
    1024
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            ngram_length: default_ngram_length(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            progress_interval: default_progress_interval(),
            partitions: default_partitions(),
            malformed_policy: MalformedPolicy::default(),
            source_page_size: default_source_page_size(),
        }
    }
}

impl IndexingSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), HashgramError> {
        let zero = |field: &str| {
            Err(HashgramError::Config(format!("indexing.{} must be > 0", field)))
        };
        if self.ngram_length == 0 {
            return zero("ngram_length");
        }
        if self.batch_size == 0 {
            return zero("batch_size");
        }
        if self.partitions == 0 {
            return zero("partitions");
        }
        if self.progress_interval == 0 {
            return zero("progress_interval");
        }
        if self.source_page_size == 0 {
            return zero("source_page_size");
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(HashgramError::Config(format!(
                "indexing.backoff_max_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Indexing pipeline settings
    #[serde(default)]
    pub indexing: IndexingSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "hashgram")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            indexing: IndexingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/hashgram/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (HASHGRAM_DB_PATH, HASHGRAM_INDEXING__BATCH_SIZE, ...)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, HashgramError> {
        let config_dir = ProjectDirs::from("", "", "hashgram")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");
        let defaults = IndexingSettings::default();

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.ngram_length", defaults.ngram_length as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.batch_size", defaults.batch_size as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.max_retries", defaults.max_retries as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.backoff_base_ms", defaults.backoff_base_ms as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.backoff_max_ms", defaults.backoff_max_ms as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.progress_interval", defaults.progress_interval as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.partitions", defaults.partitions as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.malformed_policy", defaults.malformed_policy.to_string())
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .set_default("indexing.source_page_size", defaults.source_page_size as i64)
            .map_err(|e| HashgramError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Double underscore separates nesting so single underscores stay in key names.
        builder = builder.add_source(
            Environment::with_prefix("HASHGRAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| HashgramError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| HashgramError::Config(e.to_string()))?;
        settings.indexing.validate()?;
        Ok(settings)
    }

    /// Expand ~ in db_path to the user's home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
