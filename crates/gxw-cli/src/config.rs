//! Configuration management for GXW CLI
//!
//! One YAML file with `database`, `processing`, `logging`, `correlation`
//! and `field_mappings` sections. `.env` is read first; `DATABASE_URL`,
//! `GXW_BATCH_SIZE` and `GXW_MAX_CONCURRENT_STUDIES` override the file.

use crate::error::{CliError, Result};
use gxw_common::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use gxw_ingest::mapping::FieldMappings;
use gxw_warehouse::correlation::{CorrelationSettings, DEFAULT_MIN_SAMPLES};
use gxw_warehouse::db::DbConfig;
use gxw_warehouse::load::{LoadSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

pub const DEFAULT_BATCH_SIZE: usize = gxw_warehouse::load::types::DEFAULT_BATCH_SIZE;

/// Pool size for Postgres; SQLite always gets a single connection
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

pub const DEFAULT_MAX_CONCURRENT_STUDIES: usize =
    gxw_warehouse::load::types::DEFAULT_MAX_CONCURRENT_STUDIES;

pub const DEFAULT_LOG_DIRECTORY: &str = "./logs";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_max_concurrent_studies() -> usize {
    DEFAULT_MAX_CONCURRENT_STUDIES
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIRECTORY)
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default, alias = "connection_string")]
    pub url: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default)]
    pub input_directory: Option<PathBuf>,

    #[serde(default)]
    pub gene_filter_file: Option<PathBuf>,

    #[serde(default = "default_max_concurrent_studies")]
    pub max_concurrent_studies: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            input_directory: None,
            gene_filter_file: None,
            max_concurrent_studies: DEFAULT_MAX_CONCURRENT_STUDIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Attach elapsed times to table and study events
    #[serde(default = "enabled")]
    pub log_processing_time: bool,

    /// Per-table row count events
    #[serde(default = "enabled")]
    pub log_record_counts: bool,

    /// Metadata completeness per study
    #[serde(default = "enabled")]
    pub log_data_quality: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directory: default_log_directory(),
            format: LogFormat::Text,
            output: LogOutput::Console,
            log_processing_time: true,
            log_record_counts: true,
            log_data_quality: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Fewest samples an illness group and a gene pair need
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

/// Effective configuration of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GxwConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub processing: ProcessingSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub field_mappings: FieldMappings,
}

impl GxwConfig {
    /// Read `.env`, the YAML file and the environment overrides, then validate
    pub fn load(path: &Path) -> Result<Self> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        if !path.is_file() {
            return Err(CliError::ConfigNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(text)?;
        config.field_mappings = config.field_mappings.with_defaults_for_empty();
        Ok(config)
    }

    /// Apply `DATABASE_URL`, `GXW_BATCH_SIZE` and `GXW_MAX_CONCURRENT_STUDIES`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(size) = std::env::var("GXW_BATCH_SIZE") {
            self.database.batch_size = size
                .trim()
                .parse()
                .map_err(|_| CliError::config(format!("GXW_BATCH_SIZE '{size}' is not a number")))?;
        }

        if let Ok(max) = std::env::var("GXW_MAX_CONCURRENT_STUDIES") {
            self.processing.max_concurrent_studies = max.trim().parse().map_err(|_| {
                CliError::config(format!("GXW_MAX_CONCURRENT_STUDIES '{max}' is not a number"))
            })?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.url.trim().is_empty() {
            return Err(CliError::config("database.url is required"));
        }
        if db.batch_size == 0 {
            return Err(CliError::config("database.batch_size must be at least 1"));
        }
        if db.max_connections == 0 {
            return Err(CliError::config("database.max_connections must be at least 1"));
        }
        if db.retry_base_delay_ms > db.retry_max_delay_ms {
            return Err(CliError::config(format!(
                "database.retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                db.retry_base_delay_ms, db.retry_max_delay_ms
            )));
        }
        if self.processing.max_concurrent_studies == 0 {
            return Err(CliError::config(
                "processing.max_concurrent_studies must be at least 1",
            ));
        }
        if self.correlation.min_samples < DEFAULT_MIN_SAMPLES {
            return Err(CliError::config(format!(
                "correlation.min_samples must be at least {DEFAULT_MIN_SAMPLES}"
            )));
        }
        Ok(())
    }

    /// Fingerprint stored on each run and compared on resume.
    ///
    /// Correlation settings never affect a load and are left out.
    pub fn config_hash(&self) -> Result<String> {
        let load_config = Self {
            correlation: CorrelationConfig::default(),
            ..self.clone()
        };
        gxw_common::checksum::config_hash(&load_config)
            .map_err(|e| CliError::config(format!("cannot hash configuration: {e}")))
    }

    pub fn input_directory(&self) -> Result<&Path> {
        self.processing
            .input_directory
            .as_deref()
            .ok_or_else(|| CliError::config("processing.input_directory is required"))
    }

    pub fn gene_filter_file(&self) -> Result<&Path> {
        self.processing
            .gene_filter_file
            .as_deref()
            .ok_or_else(|| CliError::config("processing.gene_filter_file is required"))
    }

    pub fn to_db_config(&self) -> DbConfig {
        DbConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            connect_timeout_secs: self.database.connection_timeout,
            ..DbConfig::default()
        }
    }

    pub fn to_load_settings(&self) -> LoadSettings {
        let db = &self.database;
        let mut settings = LoadSettings::default()
            .with_batch_size(db.batch_size)
            .with_max_concurrent_studies(self.processing.max_concurrent_studies)
            .with_retry(RetryPolicy::from_retries(
                db.max_retries,
                db.retry_base_delay_ms,
                db.retry_max_delay_ms,
            ));
        settings.log_processing_time = self.logging.log_processing_time;
        settings.log_record_counts = self.logging.log_record_counts;
        settings
    }

    pub fn to_correlation_settings(&self) -> CorrelationSettings {
        let db = &self.database;
        let mut settings = CorrelationSettings::default()
            .with_min_samples(self.correlation.min_samples)
            .with_retry(RetryPolicy::from_retries(
                db.max_retries,
                db.retry_base_delay_ms,
                db.retry_max_delay_ms,
            ));
        settings.log_processing_time = self.logging.log_processing_time;
        settings.log_record_counts = self.logging.log_record_counts;
        settings
    }

    /// `--verbose` lowers the level to debug
    pub fn to_log_config(&self, verbose: bool) -> LogConfig {
        let level = if verbose { LogLevel::Debug } else { self.logging.level };
        LogConfig::builder()
            .level(level)
            .output(self.logging.output)
            .format(self.logging.format)
            .log_dir(self.logging.directory.clone())
            .log_file_prefix("gxw")
            .build()
    }
}
