//! `gxw resume` command implementation
//!
//! Continues an unfinished run. Studies that completed are skipped; the
//! others restart at their first uncommitted batch.

use crate::commands::{connect, pipeline, study_sources};
use crate::config::GxwConfig;
use crate::error::Result;

pub async fn run(config: &GxwConfig, run_id: &str, json: bool) -> Result<()> {
    let sources = study_sources(config)?;
    let pool = connect(config).await?;
    let summary = pipeline(config, pool)?.resume(run_id, &sources).await?;
    super::run::finish(&summary, json)
}
