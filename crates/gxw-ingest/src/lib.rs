//! GXW Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Reads genomic expression studies from disk and turns them into staged
//! warehouse rows.
//!
//! # Input layout
//!
//! ```text
//! input_directory/
//!   GSE12345/
//!     metadata_GSE12345.tsv     sample metadata, one row per GSM
//!     expression_GSE12345.tsv   gene x sample expression matrix
//!   GSE67890/
//!     ...
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gxw_ingest::{discovery, gene_filter::GeneFilter, mapping::FieldMappings, rows};
//!
//! fn main() -> gxw_ingest::Result<()> {
//!     let plan = discovery::discover_studies("./data")?;
//!     let genes = GeneFilter::from_path("./genes.tsv")?;
//!     for study in &plan.studies {
//!         let readout = rows::build_study_rows(study, &genes, &FieldMappings::default())?;
//!         println!("{}: {} rows", study.accession, readout.rows.total_rows());
//!     }
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod error;
pub mod expression;
pub mod gene_filter;
pub mod mapping;
pub mod metadata;
pub mod rows;

pub use error::{IngestError, Result};
