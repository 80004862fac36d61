//! Error types for study file ingestion

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TSV error in '{path}': {source}")]
    Tsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Input directory '{0}' does not exist or is not a directory")]
    MissingInputRoot(PathBuf),

    #[error("Metadata file '{path}' is missing required columns: {missing:?}")]
    MetadataColumns { path: PathBuf, missing: Vec<String> },

    #[error("Expression file '{path}' is malformed: {reason}")]
    ExpressionFormat { path: PathBuf, reason: String },

    #[error("Gene filter '{path}' is invalid: {reason}")]
    GeneFilter { path: PathBuf, reason: String },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tsv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Tsv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn expression(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ExpressionFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
