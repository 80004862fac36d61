//! Error types for GXW CLI
//!
//! Every variant is user-facing: the message says what went wrong and what
//! to do about it.

use gxw_ingest::IngestError;
use gxw_warehouse::LoadError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file does not exist
    #[error("Configuration file not found: '{0}'. Pass --config or set GXW_CONFIG.")]
    ConfigNotFound(PathBuf),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check the config file and the GXW_* / DATABASE_URL environment variables.")]
    Config(String),

    /// YAML parsing failed
    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// Study files could not be read
    #[error("Input error: {0}. Run 'gxw validate' to check the study files.")]
    Ingest(#[from] IngestError),

    /// Warehouse operation failed
    #[error("Warehouse error: {0}. Check the database connection settings.")]
    Load(#[from] LoadError),

    /// The run finished with failed studies
    #[error("{failed} of {total} studies did not complete in run '{run_id}'. Fix the cause and run 'gxw resume --run-id {run_id}'.")]
    StudiesFailed {
        run_id: String,
        failed: usize,
        total: usize,
    },

    /// The correlation refresh left studies without fresh results
    #[error("{failed} of {total} studies failed and {not_started} were not started during the correlation refresh. Rerun 'gxw correlate' for them.")]
    CorrelationIncomplete {
        failed: usize,
        not_started: usize,
        total: usize,
    },

    /// Preflight found unusable studies
    #[error("{invalid} of {total} studies failed validation. See the findings above.")]
    InvalidStudies { invalid: usize, total: usize },

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON rendering failed
    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
