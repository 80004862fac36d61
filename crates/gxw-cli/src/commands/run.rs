//! `gxw run` command implementation
//!
//! Loads every discovered study as a new run.

use crate::commands::{connect, pipeline, print_json, study_sources};
use crate::config::GxwConfig;
use crate::error::{CliError, Result};
use crate::output::run_summary_table;
use gxw_warehouse::load::RunSummary;

pub async fn run(config: &GxwConfig, run_id: Option<String>, json: bool) -> Result<()> {
    let sources = study_sources(config)?;
    let pool = connect(config).await?;
    let summary = pipeline(config, pool)?.start(run_id, &sources).await?;
    finish(&summary, json)
}

/// Print the summary; a run with any unfinished study is an error
pub(crate) fn finish(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        print_json(summary)?;
    } else {
        println!("Run {}", summary.run_id);
        println!("{}", run_summary_table(summary));
    }

    let failed = summary.failed().count();
    if failed > 0 {
        return Err(CliError::StudiesFailed {
            run_id: summary.run_id.clone(),
            failed,
            total: summary.studies.len() + summary.skipped_studies.len(),
        });
    }
    Ok(())
}
