//! Checkpoint store
//!
//! A checkpoint row `(run_id, study_id, table_name, batch_index)` exists
//! exactly when every row of that batch is committed. `mark_committed` only
//! accepts the batch transaction's connection, so the checkpoint and the
//! batch's rows commit or roll back together.

use chrono::Utc;
use gxw_common::types::TableId;
use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, AnyPool, Row};

use crate::error::{LoadError, LoadResult};

/// The checkpoint sequence of one table load: one study, one table, one run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableScope {
    pub run_id: String,
    pub study_id: String,
    pub table: TableId,
}

impl TableScope {
    pub fn new(run_id: impl Into<String>, study_id: impl Into<String>, table: TableId) -> Self {
        Self {
            run_id: run_id.into(),
            study_id: study_id.into(),
            table,
        }
    }
}

/// Checkpoint totals for one (study, table) of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub study_id: String,
    pub table: TableId,
    pub batches: i64,
    pub last_batch: i64,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: AnyPool,
}

impl CheckpointStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn is_committed(&self, scope: &TableScope, batch_index: usize) -> LoadResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT batch_index FROM checkpoints \
             WHERE run_id = $1 AND study_id = $2 AND table_name = $3 AND batch_index = $4",
        )
        .bind(&scope.run_id)
        .bind(&scope.study_id)
        .bind(scope.table.as_str())
        .bind(batch_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// Record a batch as committed.
    ///
    /// `conn` must be the connection of the transaction that wrote the
    /// batch's rows.
    pub async fn mark_committed(
        conn: &mut AnyConnection,
        scope: &TableScope,
        batch_index: usize,
    ) -> LoadResult<()> {
        let result = sqlx::query(
            "INSERT INTO checkpoints (run_id, study_id, table_name, batch_index, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&scope.run_id)
        .bind(&scope.study_id)
        .bind(scope.table.as_str())
        .bind(batch_index as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = LoadError::from(err);
                if err.is_transient() {
                    Err(err)
                } else {
                    Err(LoadError::CheckpointWrite(format!(
                        "{}/{} batch {batch_index}: {err}",
                        scope.study_id, scope.table
                    )))
                }
            }
        }
    }

    /// Highest committed batch index, or `None` before the first commit
    pub async fn last_committed_batch(&self, scope: &TableScope) -> LoadResult<Option<usize>> {
        let last: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(batch_index) FROM checkpoints \
             WHERE run_id = $1 AND study_id = $2 AND table_name = $3",
        )
        .bind(&scope.run_id)
        .bind(&scope.study_id)
        .bind(scope.table.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(last.map(|index| index as usize))
    }

    /// Drop every checkpoint of one study within a run
    pub async fn clear(&self, run_id: &str, study_id: &str) -> LoadResult<u64> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE run_id = $1 AND study_id = $2")
            .bind(run_id)
            .bind(study_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn summarize(&self, run_id: &str) -> LoadResult<Vec<CheckpointSummary>> {
        let rows = sqlx::query(
            "SELECT study_id, table_name, COUNT(*) AS batches, MAX(batch_index) AS last_batch \
             FROM checkpoints WHERE run_id = $1 \
             GROUP BY study_id, table_name ORDER BY study_id, table_name",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> LoadResult<CheckpointSummary> {
                let table: String = row.try_get("table_name")?;
                Ok(CheckpointSummary {
                    study_id: row.try_get("study_id")?,
                    table: table.parse()?,
                    batches: row.try_get("batches")?,
                    last_batch: row.try_get("last_batch")?,
                })
            })
            .collect()
    }
}
