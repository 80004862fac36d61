//! Common utilities for warehouse integration tests
//!
//! - [`TestWarehouse`]: a SQLite warehouse in a temp directory, schema applied
//! - [`TestPostgres`]: a PostgreSQL container (used by ignored tests only)
//! - study fixtures and [`CommitHook`]s for fault injection and observation

#![allow(dead_code, clippy::unwrap_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use gxw_common::types::{SampleAttributes, StagedRow, StudyRows, TableId};
use gxw_warehouse::db::{create_pool, schema::ensure_schema, Backend, DbConfig};
use gxw_warehouse::load::{
    BatchContext, BatchResult, CommitHook, RetryPolicy, StaticSource, StudySource,
};
use gxw_warehouse::LoadError;
use sqlx::AnyPool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gxw_warehouse=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Databases
// ============================================================================

pub struct TestWarehouse {
    _dir: TempDir,
    pub pool: AnyPool,
}

impl TestWarehouse {
    pub async fn start() -> Result<Self> {
        let dir = TempDir::new()?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("gxw.db").display());
        let pool = create_pool(&DbConfig::new(url)).await?;
        ensure_schema(&pool, Backend::Sqlite).await?;
        Ok(Self { _dir: dir, pool })
    }

    pub async fn count(&self, table: &str) -> i64 {
        count(&self.pool, table).await
    }
}

pub async fn count(pool: &AnyPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pub pool: AnyPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        let pool = create_pool(&DbConfig::new(url)).await?;
        ensure_schema(&pool, Backend::Postgres).await?;
        Ok(Self {
            _container: container,
            pool,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn gene_id(index: usize) -> String {
    format!("ENSG{index:011}")
}

/// One study with `samples x genes` facts; gene ids are shared across studies
pub fn study_rows(gse: &str, samples: usize, genes: usize) -> StudyRows {
    let mut rows = StudyRows::new(gse);
    rows.platforms.push(StagedRow::platform("GPL570"));
    rows.illnesses.push(StagedRow::illness("asthma"));
    rows.illnesses.push(StagedRow::illness("UNKNOWN"));
    rows.studies.push(StagedRow::study(gse));
    rows.genes = (0..genes).map(|g| StagedRow::gene(gene_id(g))).collect();

    for s in 0..samples {
        let gsm = format!("GSM{gse}{s:04}");
        rows.samples.push(StagedRow::sample(&SampleAttributes {
            gsm_accession: gsm.clone(),
            gse_accession: gse.to_string(),
            platform_accession: "GPL570".into(),
            illness_label: if s % 2 == 0 { "asthma" } else { "UNKNOWN" }.into(),
            age: (20 + s % 50).to_string(),
            sex: if s % 3 == 0 { "F" } else { "M" }.into(),
        }));
        for g in 0..genes {
            rows.expression.push(StagedRow::expression(
                &gsm,
                gene_id(g),
                gse,
                (s as f64) * 0.5 + g as f64,
            ));
        }
    }
    rows
}

pub fn sources(studies: Vec<StudyRows>) -> Vec<Arc<dyn StudySource>> {
    studies
        .into_iter()
        .map(|rows| Arc::new(StaticSource::new(rows)) as Arc<dyn StudySource>)
        .collect()
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::from_retries(max_retries, 1, 10)
}

// ============================================================================
// Hooks
// ============================================================================

/// Records every committed batch as (study, table, batch index)
#[derive(Default)]
pub struct RecordingHook {
    pub commits: Mutex<Vec<(String, TableId, usize)>>,
}

impl RecordingHook {
    pub fn commits(&self) -> Vec<(String, TableId, usize)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn batches_for(&self, study: &str, table: TableId) -> Vec<usize> {
        self.commits()
            .into_iter()
            .filter(|(s, t, _)| s == study && *t == table)
            .map(|(_, _, b)| b)
            .collect()
    }
}

#[async_trait]
impl CommitHook for RecordingHook {
    async fn after_commit(&self, batch: &BatchContext<'_>, _result: &BatchResult) {
        self.commits.lock().unwrap().push((
            batch.scope.study_id.clone(),
            batch.scope.table,
            batch.batch_index,
        ));
    }
}

/// Cancels the run right after one batch commits, like an operator's Ctrl-C
pub struct CancelAfterBatch {
    pub table: TableId,
    pub batch_index: usize,
    pub token: CancellationToken,
}

#[async_trait]
impl CommitHook for CancelAfterBatch {
    async fn after_commit(&self, batch: &BatchContext<'_>, _result: &BatchResult) {
        if batch.scope.table == self.table && batch.batch_index == self.batch_index {
            self.token.cancel();
        }
    }
}

/// Fails the checkpoint write of one batch, after its rows are written,
/// a given number of times
pub struct FailBeforeCheckpoint {
    pub study_id: String,
    pub table: TableId,
    pub batch_index: usize,
    pub remaining: AtomicU32,
    pub transient: bool,
}

impl FailBeforeCheckpoint {
    pub fn new(
        study_id: &str,
        table: TableId,
        batch_index: usize,
        times: u32,
        transient: bool,
    ) -> Self {
        Self {
            study_id: study_id.to_string(),
            table,
            batch_index,
            remaining: AtomicU32::new(times),
            transient,
        }
    }

    pub fn fired(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl CommitHook for FailBeforeCheckpoint {
    async fn before_checkpoint(&self, batch: &BatchContext<'_>) -> Result<(), LoadError> {
        let targeted = batch.scope.study_id == self.study_id
            && batch.scope.table == self.table
            && batch.batch_index == self.batch_index;
        if !targeted {
            return Ok(());
        }

        let fire = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        match (fire, self.transient) {
            (false, _) => Ok(()),
            (true, true) => Err(LoadError::ConnectionLost("injected reset".into())),
            (true, false) => Err(LoadError::CheckpointWrite("injected failure".into())),
        }
    }
}

/// Fans one hook call out to several hooks
pub struct Hooks(pub Vec<Arc<dyn CommitHook>>);

#[async_trait]
impl CommitHook for Hooks {
    async fn before_checkpoint(&self, batch: &BatchContext<'_>) -> Result<(), LoadError> {
        for hook in &self.0 {
            hook.before_checkpoint(batch).await?;
        }
        Ok(())
    }

    async fn after_commit(&self, batch: &BatchContext<'_>, result: &BatchResult) {
        for hook in &self.0 {
            hook.after_commit(batch, result).await;
        }
    }
}
