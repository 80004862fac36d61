//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod correlate;
pub mod report;
pub mod resume;
pub mod rollback;
pub mod run;
pub mod status;
pub mod validate;

use crate::config::GxwConfig;
use crate::error::Result;
use crate::source::FileStudySource;
use gxw_ingest::discovery::discover_studies;
use gxw_ingest::gene_filter::GeneFilter;
use gxw_warehouse::db::{create_pool, schema::ensure_schema};
use gxw_warehouse::load::StudySource;
use gxw_warehouse::Pipeline;
use serde::Serialize;
use sqlx::AnyPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Open the pool and make sure the schema exists
pub async fn connect(config: &GxwConfig) -> Result<AnyPool> {
    let db = config.to_db_config();
    let pool = create_pool(&db).await?;
    ensure_schema(&pool, db.backend()?).await?;
    Ok(pool)
}

/// Discover every study under the input directory as a file-backed source
pub fn study_sources(config: &GxwConfig) -> Result<Vec<Arc<dyn StudySource>>> {
    let filter = Arc::new(GeneFilter::from_path(config.gene_filter_file()?)?);
    let plan = discover_studies(config.input_directory()?)?;
    info!(
        root = %plan.root.display(),
        studies = plan.studies.len(),
        skipped = plan.skipped.len(),
        genes = filter.len(),
        "Discovered studies"
    );
    if plan.is_empty() {
        warn!(root = %plan.root.display(), "No studies found");
    }

    let mappings = Arc::new(config.field_mappings.clone());
    Ok(plan
        .studies
        .into_iter()
        .map(|study| {
            Arc::new(FileStudySource::new(
                study,
                Arc::clone(&filter),
                Arc::clone(&mappings),
                config.logging.log_data_quality,
            )) as Arc<dyn StudySource>
        })
        .collect())
}

/// Pipeline whose token is cancelled by Ctrl-C
pub fn pipeline(config: &GxwConfig, pool: AnyPool) -> Result<Pipeline> {
    let pipeline = Pipeline::new(pool, config.to_load_settings(), config.config_hash()?);
    cancel_on_interrupt(pipeline.cancellation_token());
    Ok(pipeline)
}

/// Cancel `token` on Ctrl-C; work in flight is allowed to finish
pub fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing work in flight");
            token.cancel();
        }
    });
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
