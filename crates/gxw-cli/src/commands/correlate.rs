//! `gxw correlate` command implementation
//!
//! Recomputes gene-pair correlations from the loaded facts, study by study.

use crate::commands::{cancel_on_interrupt, connect, print_json};
use crate::config::GxwConfig;
use crate::error::{CliError, Result};
use crate::output::correlation_table;
use gxw_warehouse::correlation::CorrelationJob;
use tokio_util::sync::CancellationToken;

pub async fn run(config: &GxwConfig, studies: &[String], json: bool) -> Result<()> {
    let pool = connect(config).await?;
    let job = CorrelationJob::new(pool, config.to_correlation_settings());
    let token = CancellationToken::new();
    cancel_on_interrupt(token.clone());
    let summary = job.with_cancellation(token).run(studies).await?;

    if json {
        print_json(&summary)?;
    } else {
        if summary.studies.is_empty() && summary.is_complete() {
            println!("No studies with expression data to correlate");
        } else {
            println!("{}", correlation_table(&summary));
            println!(
                "{} correlations written in {} ms",
                summary.total_correlations(),
                summary.elapsed_ms
            );
        }
        for study in &summary.missing {
            println!("Not found: {study} has no expression data");
        }
    }

    if !summary.is_complete() {
        return Err(CliError::CorrelationIncomplete {
            failed: summary.failures.len(),
            not_started: summary.not_started.len(),
            total: summary.studies.len() + summary.failures.len() + summary.not_started.len(),
        });
    }
    Ok(())
}
