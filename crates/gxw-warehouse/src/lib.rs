//! GXW Warehouse
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads staged study rows into the expression star schema.
//!
//! # Overview
//!
//! - **Database**: SQLx `Any` pool over PostgreSQL or SQLite, schema bootstrap ([`db`])
//! - **Load engine**: identity resolution, checkpoints, batch commits, retry,
//!   study orchestration ([`load`])
//! - **Runs**: run records, forward-only status, per-study outcomes ([`runs`])
//! - **Pipeline**: start and resume entry points ([`pipeline`])
//! - **Rollback** and **reports** over recorded runs
//! - **Correlations**: per-study gene-pair Spearman refresh over the facts ([`correlation`])
//!
//! # Guarantees
//!
//! - A batch's rows and its checkpoint commit together or not at all
//! - Re-running or resuming never duplicates a dimension or fact row
//! - Facts for a study are only committed after its dimension rows
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gxw_common::types::StudyRows;
//! use gxw_warehouse::db::{create_pool, schema::ensure_schema, DbConfig};
//! use gxw_warehouse::load::{LoadSettings, StaticSource, StudySource};
//! use gxw_warehouse::pipeline::Pipeline;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DbConfig::new("sqlite://gxw.db?mode=rwc");
//! let pool = create_pool(&config).await?;
//! ensure_schema(&pool, config.backend()?).await?;
//!
//! let sources: Vec<Arc<dyn StudySource>> =
//!     vec![Arc::new(StaticSource::new(StudyRows::new("GSE1")))];
//! let summary = Pipeline::new(pool, LoadSettings::default(), "config-hash")
//!     .start(None, &sources)
//!     .await?;
//! println!("{} studies completed", summary.completed().count());
//! # Ok(())
//! # }
//! ```

pub mod correlation;
pub mod db;
pub mod error;
pub mod load;
pub mod pipeline;
pub mod report;
pub mod rollback;
pub mod runs;

#[cfg(test)]
mod testing;

pub use error::{LoadError, LoadResult};
pub use pipeline::Pipeline;
