//! GXW Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the genomic expression
//! warehouse loader.
//!
//! # Overview
//!
//! - **Error Handling**: [`GxwError`] and the crate [`Result`] alias
//! - **Logging**: console/file, text/JSON tracing setup ([`logging`])
//! - **Checksums**: SHA-256 helpers used for run configuration hashes
//! - **Types**: the staged row model shared by ingestion and loading
//!
//! # Example
//!
//! ```no_run
//! use gxw_common::types::{StagedRow, TableId};
//!
//! let gene = StagedRow::gene("ENSG00000141510");
//! assert_eq!(gene.key.table, TableId::Gene);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GxwError, Result};
pub use types::UNKNOWN_VALUE;
