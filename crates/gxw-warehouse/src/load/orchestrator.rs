//! Study orchestrator
//!
//! Runs each study through `Discovered -> DimensionsLoading -> FactsLoading ->
//! Completed`. Dimension tables load in dependency order (platform, illness,
//! gene, study, sample) and the fact table only after all of them. Studies
//! run concurrently up to `max_concurrent_studies`; within a study everything
//! is sequential. A failed study is recorded and never stops the others.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use gxw_common::types::{StudyRows, TableId};
use sqlx::AnyPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checkpoint::{CheckpointStore, TableScope};
use super::committer::{batch_count, BatchCommitter, CommitHook, NoopHook};
use super::retry::with_retry;
use super::types::{
    BatchResult, FailurePoint, LoadSettings, RunSummary, StudyProgress, StudyReport, StudyState,
    TableFailure, TableLoad,
};
use crate::error::{LoadError, LoadResult};
use crate::runs::RunStore;

/// Supplies the staged rows of one study
#[async_trait]
pub trait StudySource: Send + Sync {
    fn study_id(&self) -> &str;

    /// Rows must come back in the same order on every call
    async fn load(&self) -> anyhow::Result<StudyRows>;
}

/// Source over rows already in memory
#[derive(Debug, Clone)]
pub struct StaticSource {
    rows: StudyRows,
}

impl StaticSource {
    pub fn new(rows: StudyRows) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl StudySource for StaticSource {
    fn study_id(&self) -> &str {
        &self.rows.study_id
    }

    async fn load(&self) -> anyhow::Result<StudyRows> {
        Ok(self.rows.clone())
    }
}

/// What a study's run needs to know before it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyStart {
    Fresh,
    /// A resumed run: skip whatever the checkpoints say is done
    Resume,
}

pub struct Orchestrator {
    pool: AnyPool,
    settings: LoadSettings,
    checkpoints: CheckpointStore,
    runs: RunStore,
    hook: Arc<dyn CommitHook>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(pool: AnyPool, settings: LoadSettings) -> Self {
        Self {
            checkpoints: CheckpointStore::new(pool.clone()),
            runs: RunStore::new(pool.clone()),
            pool,
            settings,
            hook: Arc::new(NoopHook),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    fn committer(&self) -> BatchCommitter {
        BatchCommitter::new(self.pool.clone(), self.settings.retry.clone())
            .with_hook(self.hook.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Process every source not listed in `skip`, bounded by the configured
    /// concurrency, and record each study's outcome.
    pub async fn run_all(
        &self,
        run_id: &str,
        sources: &[Arc<dyn StudySource>],
        skip: &HashSet<String>,
        start: StudyStart,
    ) -> LoadResult<RunSummary> {
        self.settings.validate()?;
        let started = Instant::now();

        let (pending, skipped): (Vec<_>, Vec<_>) = sources
            .iter()
            .cloned()
            .partition(|source| !skip.contains(source.study_id()));
        let skipped: Vec<String> = skipped.iter().map(|s| s.study_id().to_string()).collect();

        if !skipped.is_empty() {
            info!(
                run_id,
                studies = skipped.len(),
                "Skipping studies completed by an earlier attempt"
            );
        }
        info!(
            run_id,
            studies = pending.len(),
            max_concurrent = self.settings.max_concurrent_studies,
            "Processing studies"
        );

        let reports: Vec<StudyReport> = stream::iter(pending)
            .map(|source| async move { self.process(run_id, source.as_ref(), start).await })
            .buffer_unordered(self.settings.max_concurrent_studies)
            .collect()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = RunSummary::new(run_id, reports, skipped, elapsed_ms);
        info!(
            run_id,
            completed = summary.completed().count(),
            failed = summary.failed().count(),
            rows_written = summary.totals.rows_written,
            rows_deduplicated = summary.totals.rows_deduplicated,
            "Run finished"
        );
        Ok(summary)
    }

    /// Load one study; never returns an error, failures land in the report
    pub async fn process(
        &self,
        run_id: &str,
        source: &dyn StudySource,
        start: StudyStart,
    ) -> StudyReport {
        let started = Instant::now();
        let study_id = source.study_id().to_string();
        let mut progress = StudyProgress::new();
        let mut tables = Vec::new();

        let outcome = self
            .drive(run_id, source, start, &mut progress, &mut tables)
            .await;

        let failure = match outcome {
            Ok(()) => None,
            Err(failure) => {
                // Failed is reachable from every non-terminal state
                let _ = progress.advance(StudyState::Failed);
                Some(failure)
            }
        };

        let totals = BatchResult::sum(tables.iter().map(|t: &TableLoad| &t.result));
        let report = StudyReport {
            study_id: study_id.clone(),
            state: progress.state(),
            resumed: start == StudyStart::Resume,
            tables,
            totals,
            elapsed_ms: started.elapsed().as_millis() as u64,
            failure,
        };

        match &report.failure {
            None => {
                let elapsed_ms = self.settings.log_processing_time.then_some(report.elapsed_ms);
                info!(
                    study_id = %study_id,
                    rows_written = totals.rows_written,
                    rows_deduplicated = totals.rows_deduplicated,
                    elapsed_ms,
                    "Study completed"
                );
            }
            Some(failure) => error!(
                study_id = %study_id,
                table = ?failure.table,
                batch_index = ?failure.batch_index,
                last_committed_batch = ?failure.last_committed_batch,
                error = %failure.error,
                "Study failed"
            ),
        }

        if let Err(e) = with_retry(&self.settings.retry, "record study outcome", || {
            self.runs.record_study(run_id, &report)
        })
        .await
        {
            error!(study_id = %study_id, error = %e, "Failed to record study outcome");
        }

        report
    }

    async fn drive(
        &self,
        run_id: &str,
        source: &dyn StudySource,
        start: StudyStart,
        progress: &mut StudyProgress,
        tables: &mut Vec<TableLoad>,
    ) -> Result<(), FailurePoint> {
        let study_id = source.study_id();
        let early = |error: String| FailurePoint {
            table: None,
            batch_index: None,
            last_committed_batch: None,
            error,
        };

        if self.cancel.is_cancelled() {
            return Err(early(LoadError::Cancelled.to_string()));
        }

        let rows = source.load().await.map_err(|e| {
            early(
                LoadError::Source {
                    study_id: study_id.to_string(),
                    message: format!("{e:#}"),
                }
                .to_string(),
            )
        })?;

        let entry = match start {
            StudyStart::Fresh => StudyState::DimensionsLoading,
            StudyStart::Resume => {
                progress.advance(StudyState::Resumed).map_err(|e| early(e.to_string()))?;
                self.resume_entry(run_id, &rows)
                    .await
                    .map_err(|e| early(e.to_string()))?
            }
        };

        let committer = self.committer();

        if entry == StudyState::DimensionsLoading {
            progress.advance(StudyState::DimensionsLoading).map_err(|e| early(e.to_string()))?;
            for table in TableId::DIMENSIONS {
                self.load_table(&committer, run_id, &rows, table, tables).await?;
            }
        }

        progress.advance(StudyState::FactsLoading).map_err(|e| early(e.to_string()))?;
        self.load_table(&committer, run_id, &rows, TableId::Expression, tables).await?;

        progress.advance(StudyState::Completed).map_err(|e| early(e.to_string()))?;

        // A failed clear leaves the study completed with its checkpoints
        match with_retry(&self.settings.retry, "clear checkpoints", || {
            self.checkpoints.clear(run_id, study_id)
        })
        .await
        {
            Ok(cleared) => debug!(study_id, cleared, "Checkpoints cleared"),
            Err(e) => warn!(study_id, error = %e, "Failed to clear checkpoints"),
        }

        Ok(())
    }

    /// Where a resumed study re-enters: facts if every dimension batch is
    /// already checkpointed, dimensions otherwise
    async fn resume_entry(&self, run_id: &str, rows: &StudyRows) -> LoadResult<StudyState> {
        for table in TableId::DIMENSIONS {
            let expected = batch_count(rows.rows(table).len(), self.settings.batch_size);
            if expected == 0 {
                continue;
            }
            let scope = TableScope::new(run_id, &rows.study_id, table);
            let last = with_retry(&self.settings.retry, "read last checkpoint", || {
                self.checkpoints.last_committed_batch(&scope)
            })
            .await?;
            if last.map_or(true, |index| index + 1 < expected) {
                return Ok(StudyState::DimensionsLoading);
            }
        }
        Ok(StudyState::FactsLoading)
    }

    /// Commit one table and append its counters to `tables`, including the
    /// batches a failed load did commit
    async fn load_table(
        &self,
        committer: &BatchCommitter,
        run_id: &str,
        rows: &StudyRows,
        table: TableId,
        tables: &mut Vec<TableLoad>,
    ) -> Result<(), FailurePoint> {
        let started = Instant::now();
        let scope = TableScope::new(run_id, &rows.study_id, table);
        let staged = rows.rows(table);

        match committer.commit(&scope, staged, self.settings.batch_size).await {
            Ok(result) => {
                self.log_table(&scope, &result, started);
                tables.push(TableLoad { table, result });
                Ok(())
            }
            Err(TableFailure { batch_index, progress, error }) => {
                debug!(
                    study_id = %scope.study_id,
                    table = %table,
                    committed = progress.committed_batches,
                    skipped = progress.skipped_batches,
                    "Table load stopped"
                );
                tables.push(TableLoad { table, result: progress });
                // Batches run in index order, so every earlier one is committed
                Err(FailurePoint {
                    table: Some(table),
                    batch_index: Some(batch_index),
                    last_committed_batch: batch_index.checked_sub(1),
                    error: error.to_string(),
                })
            }
        }
    }

    fn log_table(&self, scope: &TableScope, result: &BatchResult, started: Instant) {
        let elapsed_ms = self
            .settings
            .log_processing_time
            .then(|| started.elapsed().as_millis() as u64);

        if self.settings.log_record_counts {
            info!(
                study_id = %scope.study_id,
                table = %scope.table,
                committed_batches = result.committed_batches,
                skipped_batches = result.skipped_batches,
                rows_written = result.rows_written,
                rows_deduplicated = result.rows_deduplicated,
                rows_rejected = result.rows_rejected,
                rows_malformed = result.rows_malformed,
                elapsed_ms,
                "Table loaded"
            );
        } else {
            debug!(study_id = %scope.study_id, table = %scope.table, elapsed_ms, "Table loaded");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::load::committer::BatchContext;
    use crate::testing::sqlite_pool;
    use gxw_common::types::{SampleAttributes, StagedRow};
    use tempfile::TempDir;

    fn study(gse: &str, samples: usize, genes: usize) -> StudyRows {
        let mut rows = StudyRows::new(gse);
        rows.platforms.push(StagedRow::platform("GPL570"));
        rows.illnesses.push(StagedRow::illness("asthma"));
        rows.studies.push(StagedRow::study(gse));
        for g in 0..genes {
            rows.genes.push(StagedRow::gene(format!("ENSG{g:05}")));
        }
        for s in 0..samples {
            let gsm = format!("GSM{gse}{s}");
            rows.samples.push(StagedRow::sample(&SampleAttributes {
                gsm_accession: gsm.clone(),
                gse_accession: gse.into(),
                platform_accession: "GPL570".into(),
                illness_label: "asthma".into(),
                age: "50".into(),
                sex: "M".into(),
            }));
            for g in 0..genes {
                rows.expression
                    .push(StagedRow::expression(&gsm, format!("ENSG{g:05}"), gse, (s * g) as f64));
            }
        }
        rows
    }

    struct FailingSource;

    #[async_trait]
    impl StudySource for FailingSource {
        fn study_id(&self) -> &str {
            "GSE404"
        }

        async fn load(&self) -> anyhow::Result<StudyRows> {
            anyhow::bail!("expression file vanished")
        }
    }

    #[tokio::test]
    async fn test_study_walks_through_every_state() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let orchestrator = Orchestrator::new(pool.clone(), LoadSettings::default().with_batch_size(7));
        RunStore::new(pool.clone()).create(Some("run".into()), "h").await.unwrap();

        let source = StaticSource::new(study("GSE1", 3, 5));
        let report = orchestrator.process("run", &source, StudyStart::Fresh).await;

        assert_eq!(report.state, StudyState::Completed);
        assert_eq!(report.tables.len(), 6);
        assert_eq!(report.table(TableId::Expression).unwrap().rows_written, 15);
        assert_eq!(report.table(TableId::Expression).unwrap().committed_batches, 3);
        assert_eq!(report.totals.rows_written, 1 + 1 + 5 + 1 + 3 + 15);

        let checkpoints: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkpoints")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(checkpoints, 0, "checkpoints are cleared after success");
    }

    /// Moves the checkpoints table away once the last fact batch commits
    struct HideCheckpoints {
        pool: AnyPool,
    }

    #[async_trait]
    impl CommitHook for HideCheckpoints {
        async fn after_commit(&self, batch: &BatchContext<'_>, _result: &BatchResult) {
            let last_fact_batch = batch.scope.table == TableId::Expression
                && batch.batch_index + 1 == batch.batch_count;
            if last_fact_batch {
                sqlx::query("ALTER TABLE checkpoints RENAME TO checkpoints_hidden")
                    .execute(&self.pool)
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_failed_checkpoint_clear_keeps_study_completed() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let orchestrator = Orchestrator::new(pool.clone(), LoadSettings::default().with_batch_size(7))
            .with_hook(Arc::new(HideCheckpoints { pool: pool.clone() }));
        RunStore::new(pool.clone()).create(Some("run".into()), "h").await.unwrap();

        let source = StaticSource::new(study("GSE1", 3, 5));
        let report = orchestrator.process("run", &source, StudyStart::Fresh).await;

        assert_eq!(report.state, StudyState::Completed);
        assert!(report.failure.is_none());
        let recorded = RunStore::new(pool.clone()).studies("run").await.unwrap();
        assert_eq!(recorded[0].status, "completed");

        sqlx::query("ALTER TABLE checkpoints_hidden RENAME TO checkpoints")
            .execute(&pool)
            .await
            .unwrap();
        // Five single-batch dimensions plus three fact batches
        let checkpoints: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkpoints")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(checkpoints, 8);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_stop_other_studies() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let orchestrator = Orchestrator::new(
            pool.clone(),
            LoadSettings::default().with_max_concurrent_studies(2),
        );
        RunStore::new(pool.clone()).create(Some("run".into()), "h").await.unwrap();

        let sources: Vec<Arc<dyn StudySource>> = vec![
            Arc::new(FailingSource),
            Arc::new(StaticSource::new(study("GSE1", 2, 2))),
        ];
        let summary = orchestrator
            .run_all("run", &sources, &HashSet::new(), StudyStart::Fresh)
            .await
            .unwrap();

        assert_eq!(summary.completed().count(), 1);
        let failed = summary.study("GSE404").unwrap();
        assert_eq!(failed.state, StudyState::Failed);
        let failure = failed.failure.as_ref().unwrap();
        assert_eq!(failure.table, None);
        assert!(failure.error.contains("expression file vanished"));

        let recorded = RunStore::new(pool).studies("run").await.unwrap();
        assert_eq!(recorded.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_studies_are_not_touched() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let orchestrator = Orchestrator::new(pool.clone(), LoadSettings::default());
        RunStore::new(pool.clone()).create(Some("run".into()), "h").await.unwrap();

        let sources: Vec<Arc<dyn StudySource>> =
            vec![Arc::new(StaticSource::new(study("GSE1", 1, 1)))];
        let skip: HashSet<String> = ["GSE1".to_string()].into_iter().collect();
        let summary = orchestrator.run_all("run", &sources, &skip, StudyStart::Fresh).await.unwrap();

        assert!(summary.studies.is_empty());
        assert_eq!(summary.skipped_studies, vec!["GSE1".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_with_complete_dimensions_enters_facts() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let settings = LoadSettings::default().with_batch_size(4);
        let orchestrator = Orchestrator::new(pool.clone(), settings.clone());
        let rows = study("GSE1", 2, 3);

        let committer = BatchCommitter::new(pool.clone(), settings.retry.clone());
        for table in TableId::DIMENSIONS {
            committer
                .commit(&TableScope::new("run", "GSE1", table), rows.rows(table), 4)
                .await
                .unwrap();
        }
        assert_eq!(orchestrator.resume_entry("run", &rows).await.unwrap(), StudyState::FactsLoading);
        assert_eq!(
            orchestrator.resume_entry("other-run", &rows).await.unwrap(),
            StudyState::DimensionsLoading
        );
    }
}
