//! Run bookkeeping: the `runs` and `run_studies` tables

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{LoadError, LoadResult};
use crate::load::types::StudyReport;

/// Run status; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Resumed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Resumed => "resumed",
        }
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Completed | RunStatus::Failed)
                | (RunStatus::Failed, RunStatus::Resumed)
                | (RunStatus::Resumed, RunStatus::Completed | RunStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = LoadError;

    fn from_str(s: &str) -> LoadResult<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "resumed" => Ok(RunStatus::Resumed),
            other => Err(LoadError::config(format!("unknown run status '{other}'"))),
        }
    }
}

/// A row of the `runs` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub config_hash: String,
}

impl RunRecord {
    fn from_row(row: &AnyRow) -> LoadResult<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            run_id: row.try_get("run_id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            status: status.parse()?,
            config_hash: row.try_get("config_hash")?,
        })
    }
}

/// A row of the `run_studies` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub study_id: String,
    pub status: String,
    pub report: Option<StudyReport>,
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct RunStore {
    pool: AnyPool,
}

impl RunStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Create a run in `running` state. A fresh UUID is used when no id is given.
    pub async fn create(&self, run_id: Option<String>, config_hash: &str) -> LoadResult<RunRecord> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(existing) = self.find(&run_id).await? {
            return Err(LoadError::RunState {
                run_id,
                action: "created",
                status: format!("already exists as {}", existing.status),
            });
        }

        let record = RunRecord {
            run_id,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            status: RunStatus::Running,
            config_hash: config_hash.to_string(),
        };

        sqlx::query(
            "INSERT INTO runs (run_id, started_at, finished_at, status, config_hash) \
             VALUES ($1, $2, NULL, $3, $4)",
        )
        .bind(&record.run_id)
        .bind(&record.started_at)
        .bind(record.status.as_str())
        .bind(&record.config_hash)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn find(&self, run_id: &str) -> LoadResult<Option<RunRecord>> {
        let row = sqlx::query(
            "SELECT run_id, started_at, finished_at, status, config_hash FROM runs WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(RunRecord::from_row).transpose()
    }

    pub async fn get(&self, run_id: &str) -> LoadResult<RunRecord> {
        self.find(run_id)
            .await?
            .ok_or_else(|| LoadError::RunNotFound(run_id.to_string()))
    }

    /// Move a run to `next`, rejecting backward or sideways moves
    pub async fn transition(&self, run_id: &str, next: RunStatus) -> LoadResult<RunRecord> {
        let current = self.get(run_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(LoadError::InvalidTransition {
                entity: "run",
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        let finished_at = next.is_terminal().then(|| Utc::now().to_rfc3339());
        let updated = sqlx::query(
            "UPDATE runs SET status = $1, finished_at = $2 WHERE run_id = $3 AND status = $4",
        )
        .bind(next.as_str())
        .bind(finished_at.clone())
        .bind(run_id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        // Another process moved the run between the read and the update
        if updated.rows_affected() == 0 {
            let actual = self.get(run_id).await?;
            return Err(LoadError::InvalidTransition {
                entity: "run",
                from: actual.status.to_string(),
                to: next.to_string(),
            });
        }

        Ok(RunRecord {
            status: next,
            finished_at,
            ..current
        })
    }

    /// Most recent runs first
    pub async fn list(&self, limit: usize) -> LoadResult<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT run_id, started_at, finished_at, status, config_hash FROM runs \
             ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(RunRecord::from_row).collect()
    }

    /// Upsert the outcome of one study
    pub async fn record_study(&self, run_id: &str, report: &StudyReport) -> LoadResult<()> {
        let status = if report.is_completed() { "completed" } else { "failed" };
        let error = report.failure.as_ref().map(|f| f.error.clone());

        sqlx::query(
            "INSERT INTO run_studies (run_id, study_id, status, report, error, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (run_id, study_id) DO UPDATE SET \
             status = excluded.status, report = excluded.report, \
             error = excluded.error, updated_at = excluded.updated_at",
        )
        .bind(run_id)
        .bind(&report.study_id)
        .bind(status)
        .bind(serde_json::to_string(report)?)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn studies(&self, run_id: &str) -> LoadResult<Vec<StudyRecord>> {
        let rows = sqlx::query(
            "SELECT study_id, status, report, error, updated_at FROM run_studies \
             WHERE run_id = $1 ORDER BY study_id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> LoadResult<StudyRecord> {
                let report: Option<String> = row.try_get("report")?;
                Ok(StudyRecord {
                    study_id: row.try_get("study_id")?,
                    status: row.try_get("status")?,
                    report: report.map(|json| serde_json::from_str(&json)).transpose()?,
                    error: row.try_get("error")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    pub async fn completed_studies(&self, run_id: &str) -> LoadResult<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT study_id FROM run_studies WHERE run_id = $1 AND status = 'completed'",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::load::types::{BatchResult, FailurePoint, StudyState};
    use crate::testing::sqlite_pool;
    use gxw_common::types::TableId;
    use tempfile::TempDir;

    fn report(study_id: &str, state: StudyState) -> StudyReport {
        StudyReport {
            study_id: study_id.into(),
            state,
            resumed: false,
            tables: Vec::new(),
            totals: BatchResult::default(),
            elapsed_ms: 12,
            failure: (state == StudyState::Failed).then(|| FailurePoint {
                table: Some(TableId::Expression),
                batch_index: Some(3),
                last_committed_batch: Some(2),
                error: "Connection lost: reset".into(),
            }),
        }
    }

    #[test]
    fn test_status_transitions_move_forward() {
        use RunStatus::*;
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Resumed));
        assert!(Resumed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Resumed));
        assert!(!Running.can_transition_to(Resumed));
        assert!(!Failed.can_transition_to(Running));
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(sqlite_pool(&dir).await);

        let run = store.create(Some("run-1".into()), "abc").await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(store.create(Some("run-1".into()), "abc").await.is_err());

        let failed = store.transition("run-1", RunStatus::Failed).await.unwrap();
        assert!(failed.finished_at.is_some());

        let resumed = store.transition("run-1", RunStatus::Resumed).await.unwrap();
        assert_eq!(resumed.finished_at, None);

        let err = store.transition("run-1", RunStatus::Running).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidTransition { entity: "run", .. }));

        assert_eq!(store.get("run-1").await.unwrap().status, RunStatus::Resumed);
        assert!(matches!(store.get("nope").await, Err(LoadError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_generated_run_ids_are_listed() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(sqlite_pool(&dir).await);

        let a = store.create(None, "h").await.unwrap();
        let b = store.create(None, "h").await.unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(store.list(10).await.unwrap().len(), 2);
        assert_eq!(store.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_study_outcomes_are_upserted() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(sqlite_pool(&dir).await);
        store.create(Some("run-1".into()), "h").await.unwrap();

        store.record_study("run-1", &report("GSE2", StudyState::Failed)).await.unwrap();
        store.record_study("run-1", &report("GSE1", StudyState::Completed)).await.unwrap();
        assert_eq!(store.completed_studies("run-1").await.unwrap().len(), 1);

        store.record_study("run-1", &report("GSE2", StudyState::Completed)).await.unwrap();
        let studies = store.studies("run-1").await.unwrap();
        assert_eq!(studies.len(), 2);
        assert!(studies.iter().all(|s| s.status == "completed" && s.error.is_none()));
        assert_eq!(studies[0].report.as_ref().unwrap().elapsed_ms, 12);
        assert_eq!(store.completed_studies("run-1").await.unwrap().len(), 2);
    }
}
