//! Batch committer
//!
//! Splits one table's rows into fixed-size batches and commits each batch
//! together with its checkpoint. Batch `i` is always rows
//! `[i * batch_size, (i + 1) * batch_size)`, so the same input yields the same
//! batch indices on every attempt of a run.
//!
//! Per batch:
//! 1. skip it if the checkpoint already exists
//! 2. open a transaction; drop malformed rows, count rows whose natural key
//!    already resolves, insert the rest (rows with a missing reference are
//!    rejected)
//! 3. write the checkpoint on the same transaction and commit
//!
//! Steps 2-3 are one atomic unit and are retried as a whole on transient
//! failure. Batches run strictly in index order.

use async_trait::async_trait;
use gxw_common::types::StagedRow;
use sqlx::AnyPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::checkpoint::{CheckpointStore, TableScope};
use super::identity::{Assignment, IdentityResolver};
use super::retry::{with_retry, RetryPolicy};
use super::tables::spec;
use super::types::{BatchResult, TableFailure};
use crate::error::{LoadError, LoadResult};

/// Identifies the batch a hook is called for
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    pub scope: &'a TableScope,
    pub batch_index: usize,
    pub batch_count: usize,
    pub rows: usize,
}

/// Observation and fault-injection points around each atomic unit
#[async_trait]
pub trait CommitHook: Send + Sync {
    /// Runs inside the batch transaction after the row writes, right before
    /// the checkpoint insert. An error rolls the whole batch back.
    async fn before_checkpoint(&self, _batch: &BatchContext<'_>) -> LoadResult<()> {
        Ok(())
    }

    /// Runs after the batch transaction has committed
    async fn after_commit(&self, _batch: &BatchContext<'_>, _result: &BatchResult) {}
}

/// Hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl CommitHook for NoopHook {}

/// Contiguous batches of `batch_size` rows with their 0-based index
pub fn partition<T>(rows: &[T], batch_size: usize) -> impl Iterator<Item = (usize, &[T])> {
    rows.chunks(batch_size.max(1)).enumerate()
}

pub fn batch_count(rows: usize, batch_size: usize) -> usize {
    rows.div_ceil(batch_size.max(1))
}

pub struct BatchCommitter {
    pool: AnyPool,
    checkpoints: CheckpointStore,
    retry: RetryPolicy,
    hook: Arc<dyn CommitHook>,
    cancel: CancellationToken,
}

impl BatchCommitter {
    pub fn new(pool: AnyPool, retry: RetryPolicy) -> Self {
        Self {
            checkpoints: CheckpointStore::new(pool.clone()),
            pool,
            retry,
            hook: Arc::new(NoopHook),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Token checked between batches; a cancelled load stops before the next one
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Commit `rows` into `scope.table` in batches of `batch_size`.
    ///
    /// On failure, returns the index of the batch that failed together with
    /// the counters of the batches that were committed or skipped before it.
    pub async fn commit(
        &self,
        scope: &TableScope,
        rows: &[StagedRow],
        batch_size: usize,
    ) -> Result<BatchResult, TableFailure> {
        let batch_count = batch_count(rows.len(), batch_size);
        let mut result = BatchResult::default();

        for (batch_index, batch) in partition(rows, batch_size) {
            let fail = |progress: BatchResult, error: LoadError| TableFailure {
                batch_index,
                progress,
                error,
            };

            if self.cancel.is_cancelled() {
                return Err(fail(result, LoadError::Cancelled));
            }

            let done = with_retry(&self.retry, "check checkpoint", || {
                self.checkpoints.is_committed(scope, batch_index)
            })
            .await
            .map_err(|e| fail(result, e))?;

            if done {
                result.skipped_batches += 1;
                debug!(
                    study_id = %scope.study_id,
                    table = %scope.table,
                    batch_index,
                    "Batch already committed, skipping"
                );
                continue;
            }

            let context = BatchContext {
                scope,
                batch_index,
                batch_count,
                rows: batch.len(),
            };

            let outcome = with_retry(&self.retry, "commit batch", || {
                self.commit_batch(&context, batch)
            })
            .await
            .map_err(|e| fail(result, e))?;

            result.absorb(&outcome);
            debug!(
                study_id = %scope.study_id,
                table = %scope.table,
                batch_index,
                batch_count,
                written = outcome.rows_written,
                deduplicated = outcome.rows_deduplicated,
                rejected = outcome.rows_rejected,
                malformed = outcome.rows_malformed,
                "Batch committed"
            );

            self.hook.after_commit(&context, &outcome).await;
        }

        Ok(result)
    }

    /// One attempt of one atomic unit
    async fn commit_batch(&self, context: &BatchContext<'_>, batch: &[StagedRow]) -> LoadResult<BatchResult> {
        let scope = context.scope;
        let table = spec(scope.table);
        let mut outcome = BatchResult::default();

        let mut tx = self.pool.begin().await?;
        let mut resolver = IdentityResolver::new();

        for row in batch {
            if !table.accepts(row) {
                outcome.rows_malformed += 1;
                continue;
            }

            if resolver.resolve(&mut *tx, &row.key).await?.is_some() {
                outcome.rows_deduplicated += 1;
                continue;
            }

            match resolver.assign(&mut *tx, row, &scope.run_id).await? {
                Assignment::Created(_) => outcome.rows_written += 1,
                Assignment::Existing(_) => outcome.rows_deduplicated += 1,
                Assignment::MissingReference(_) => outcome.rows_rejected += 1,
            }
        }

        self.hook.before_checkpoint(context).await?;
        CheckpointStore::mark_committed(&mut *tx, scope, context.batch_index).await?;
        tx.commit().await?;

        outcome.committed_batches = 1;
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::sqlite_pool;
    use gxw_common::types::TableId;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn genes(n: usize) -> Vec<StagedRow> {
        (0..n).map(|i| StagedRow::gene(format!("ENSG{i:011}"))).collect()
    }

    async fn count(pool: &AnyPool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    /// Fails the checkpoint write of one batch index, once
    struct FailCheckpointOnce {
        batch_index: usize,
        fired: Mutex<bool>,
    }

    #[async_trait]
    impl CommitHook for FailCheckpointOnce {
        async fn before_checkpoint(&self, batch: &BatchContext<'_>) -> LoadResult<()> {
            let mut fired = self.fired.lock().unwrap();
            if batch.batch_index == self.batch_index && !*fired {
                *fired = true;
                return Err(LoadError::CheckpointWrite("injected".into()));
            }
            Ok(())
        }
    }

    proptest! {
        #[test]
        fn prop_partition_covers_rows_in_order(len in 0usize..5_000, batch_size in 1usize..1_500) {
            let rows: Vec<usize> = (0..len).collect();
            let batches: Vec<(usize, &[usize])> = partition(&rows, batch_size).collect();

            prop_assert_eq!(batches.len(), batch_count(len, batch_size));
            for (position, (index, batch)) in batches.iter().enumerate() {
                prop_assert_eq!(*index, position);
                prop_assert!(!batch.is_empty() && batch.len() <= batch_size);
                prop_assert_eq!(batch[0], index * batch_size);
            }
            let flattened: Vec<usize> = batches.iter().flat_map(|(_, b)| b.iter().copied()).collect();
            prop_assert_eq!(flattened, rows);
        }
    }

    #[test]
    fn test_partition_of_fact_load() {
        let rows = vec![(); 19_560];
        let sizes: Vec<usize> = partition(&rows, 1000).map(|(_, b)| b.len()).collect();
        assert_eq!(sizes.len(), 20);
        assert!(sizes[..19].iter().all(|s| *s == 1000));
        assert_eq!(sizes[19], 560);
    }

    #[tokio::test]
    async fn test_commit_then_rerun_skips_every_batch() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let committer = BatchCommitter::new(pool.clone(), RetryPolicy::none());
        let scope = TableScope::new("run-1", "GSE1", TableId::Gene);
        let rows = genes(25);

        let first = committer.commit(&scope, &rows, 10).await.unwrap();
        assert_eq!(first.committed_batches, 3);
        assert_eq!(first.rows_written, 25);

        let second = committer.commit(&scope, &rows, 10).await.unwrap();
        assert_eq!(second.committed_batches, 0);
        assert_eq!(second.skipped_batches, 3);
        assert_eq!(second.rows_written, 0);
        assert_eq!(count(&pool, "dim_gene").await, 25);
    }

    #[tokio::test]
    async fn test_all_duplicate_batch_still_checkpoints() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let committer = BatchCommitter::new(pool.clone(), RetryPolicy::none());
        let rows = genes(10);

        committer
            .commit(&TableScope::new("run-1", "GSE1", TableId::Gene), &rows, 10)
            .await
            .unwrap();

        let other = TableScope::new("run-1", "GSE2", TableId::Gene);
        let result = committer.commit(&other, &rows, 10).await.unwrap();
        assert_eq!(result.committed_batches, 1);
        assert_eq!(result.rows_deduplicated, 10);
        assert_eq!(result.rows_written, 0);

        let checkpoints = CheckpointStore::new(pool.clone());
        assert!(checkpoints.is_committed(&other, 0).await.unwrap());
        assert_eq!(count(&pool, "dim_gene").await, 10);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_rolls_back_rows() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let hook = Arc::new(FailCheckpointOnce {
            batch_index: 1,
            fired: Mutex::new(false),
        });
        let committer = BatchCommitter::new(pool.clone(), RetryPolicy::none()).with_hook(hook);
        let scope = TableScope::new("run-1", "GSE1", TableId::Gene);
        let rows = genes(30);

        let failure = committer.commit(&scope, &rows, 10).await.unwrap_err();
        assert_eq!(failure.batch_index, 1);
        assert_eq!(failure.progress.committed_batches, 1);
        assert!(matches!(failure.error, LoadError::CheckpointWrite(_)));
        // Batch 0 survives; nothing of batch 1 does
        assert_eq!(count(&pool, "dim_gene").await, 10);
        assert_eq!(count(&pool, "checkpoints").await, 1);

        let rerun = committer.commit(&scope, &rows, 10).await.unwrap();
        assert_eq!(rerun.skipped_batches, 1);
        assert_eq!(rerun.committed_batches, 2);
        assert_eq!(rerun.rows_written, 20);
        assert_eq!(count(&pool, "dim_gene").await, 30);
    }

    #[tokio::test]
    async fn test_malformed_and_dangling_rows_are_counted() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let committer = BatchCommitter::new(pool.clone(), RetryPolicy::none());

        let genes = vec![StagedRow::gene("ENSG1"), StagedRow::gene(""), StagedRow::gene("ENSG2")];
        let result = committer
            .commit(&TableScope::new("run-1", "GSE1", TableId::Gene), &genes, 1000)
            .await
            .unwrap();
        assert_eq!(result.rows_written, 2);
        assert_eq!(result.rows_malformed, 1);

        // No sample or study rows exist, so every fact is dangling
        let facts = vec![
            StagedRow::expression("GSM1", "ENSG1", "GSE1", 1.0),
            StagedRow::expression("GSM1", "ENSG2", "GSE1", f64::INFINITY),
        ];
        let result = committer
            .commit(&TableScope::new("run-1", "GSE1", TableId::Expression), &facts, 1000)
            .await
            .unwrap();
        assert_eq!(result.rows_rejected, 1);
        assert_eq!(result.rows_malformed, 1);
        assert_eq!(result.committed_batches, 1);
        assert_eq!(count(&pool, "fact_expression").await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_load_stops_before_next_batch() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let cancel = CancellationToken::new();
        let committer = BatchCommitter::new(pool.clone(), RetryPolicy::none())
            .with_cancellation(cancel.clone());
        cancel.cancel();

        let failure = committer
            .commit(&TableScope::new("run-1", "GSE1", TableId::Gene), &genes(5), 2)
            .await
            .unwrap_err();
        assert_eq!(failure.batch_index, 0);
        assert!(matches!(failure.error, LoadError::Cancelled));
        assert_eq!(count(&pool, "dim_gene").await, 0);
    }
}
