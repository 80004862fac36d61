//! `gxw rollback` command implementation

use crate::commands::connect;
use crate::config::GxwConfig;
use crate::error::Result;
use gxw_warehouse::rollback::rollback;

/// Remove one run's facts, checkpoints and outcomes; dimensions stay
pub async fn run(config: &GxwConfig, run_id: &str) -> Result<()> {
    let pool = connect(config).await?;
    let summary = rollback(&pool, run_id).await?;

    println!("Rolled back run {run_id}");
    println!("  Facts deleted:       {}", summary.facts_deleted);
    println!("  Checkpoints deleted: {}", summary.checkpoints_deleted);
    println!("  Study outcomes:      {}", summary.studies_deleted);
    Ok(())
}
