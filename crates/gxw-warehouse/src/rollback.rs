//! Rollback of one run's contribution
//!
//! Deletes, in one transaction, the facts a run inserted, its checkpoints,
//! its study outcomes and the run row. Dimension rows are shared by every
//! run and are never deleted.

use serde::{Deserialize, Serialize};
use sqlx::AnyPool;
use tracing::info;

use crate::error::LoadResult;
use crate::runs::RunStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub facts_deleted: u64,
    pub checkpoints_deleted: u64,
    pub studies_deleted: u64,
}

pub async fn rollback(pool: &AnyPool, run_id: &str) -> LoadResult<RollbackSummary> {
    // Fails with RunNotFound before anything is touched
    let run = RunStore::new(pool.clone()).get(run_id).await?;

    let mut tx = pool.begin().await?;

    let facts = sqlx::query("DELETE FROM fact_expression WHERE run_id = $1")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    let checkpoints = sqlx::query("DELETE FROM checkpoints WHERE run_id = $1")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    let studies = sqlx::query("DELETE FROM run_studies WHERE run_id = $1")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM runs WHERE run_id = $1")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let summary = RollbackSummary {
        facts_deleted: facts.rows_affected(),
        checkpoints_deleted: checkpoints.rows_affected(),
        studies_deleted: studies.rows_affected(),
    };
    info!(
        run_id,
        status = %run.status,
        facts_deleted = summary.facts_deleted,
        checkpoints_deleted = summary.checkpoints_deleted,
        studies_deleted = summary.studies_deleted,
        "Run rolled back"
    );
    Ok(summary)
}
