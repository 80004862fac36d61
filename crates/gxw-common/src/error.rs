//! Error types shared across GXW crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, GxwError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum GxwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
