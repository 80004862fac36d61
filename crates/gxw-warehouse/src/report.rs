//! Run report and warehouse row counts

use gxw_common::types::TableId;
use serde::{Deserialize, Serialize};
use sqlx::AnyPool;

use crate::error::LoadResult;
use crate::load::checkpoint::{CheckpointStore, CheckpointSummary};
use crate::load::types::BatchResult;
use crate::runs::{RunRecord, RunStore, StudyRecord};

/// Everything recorded about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunRecord,
    pub studies: Vec<StudyRecord>,
    /// Checkpoints still held, i.e. of studies that did not complete
    pub checkpoints: Vec<CheckpointSummary>,
    pub totals: BatchResult,
}

impl RunReport {
    pub async fn load(pool: &AnyPool, run_id: &str) -> LoadResult<Self> {
        let runs = RunStore::new(pool.clone());
        let run = runs.get(run_id).await?;
        let studies = runs.studies(run_id).await?;
        let checkpoints = CheckpointStore::new(pool.clone()).summarize(run_id).await?;
        let totals = BatchResult::sum(
            studies
                .iter()
                .filter_map(|s| s.report.as_ref())
                .map(|r| &r.totals),
        );

        Ok(Self {
            run,
            studies,
            checkpoints,
            totals,
        })
    }

    pub fn completed_studies(&self) -> usize {
        self.studies.iter().filter(|s| s.status == "completed").count()
    }

    pub fn failed_studies(&self) -> usize {
        self.studies.len() - self.completed_studies()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCount {
    pub table: TableId,
    pub rows: i64,
}

/// Row count of every warehouse table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCounts {
    pub tables: Vec<TableCount>,
}

impl WarehouseCounts {
    pub async fn load(pool: &AnyPool) -> LoadResult<Self> {
        let mut tables = Vec::with_capacity(TableId::LOAD_ORDER.len());
        for table in TableId::LOAD_ORDER {
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.as_str()))
                .fetch_one(pool)
                .await?;
            tables.push(TableCount { table, rows });
        }
        Ok(Self { tables })
    }

    pub fn get(&self, table: TableId) -> i64 {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map_or(0, |t| t.rows)
    }
}
