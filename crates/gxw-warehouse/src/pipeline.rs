//! Run lifecycle: start a run or resume an unfinished one

use sqlx::AnyPool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{LoadError, LoadResult};
use crate::load::committer::{CommitHook, NoopHook};
use crate::load::orchestrator::{Orchestrator, StudySource, StudyStart};
use crate::load::types::{LoadSettings, RunSummary};
use crate::runs::{RunRecord, RunStatus, RunStore};

/// Entry point tying the run store to the study orchestrator
pub struct Pipeline {
    pool: AnyPool,
    settings: LoadSettings,
    config_hash: String,
    hook: Arc<dyn CommitHook>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(pool: AnyPool, settings: LoadSettings, config_hash: impl Into<String>) -> Self {
        Self {
            pool,
            settings,
            config_hash: config_hash.into(),
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

    /// Token that stops the run after in-flight batches commit
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.pool.clone(), self.settings.clone())
            .with_hook(self.hook.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Create a run and load every study
    pub async fn start(
        &self,
        run_id: Option<String>,
        sources: &[Arc<dyn StudySource>],
    ) -> LoadResult<RunSummary> {
        self.settings.validate()?;
        let runs = RunStore::new(self.pool.clone());
        let run = runs.create(run_id, &self.config_hash).await?;
        info!(
            run_id = %run.run_id,
            studies = sources.len(),
            config_hash = %run.config_hash,
            "Run started"
        );

        let summary = self
            .orchestrator()
            .run_all(&run.run_id, sources, &HashSet::new(), StudyStart::Fresh)
            .await;
        self.finish(&runs, &run, summary).await
    }

    /// Continue a run that did not complete.
    ///
    /// Studies already completed in this run are skipped; the rest pick up at
    /// their first uncommitted batch.
    pub async fn resume(
        &self,
        run_id: &str,
        sources: &[Arc<dyn StudySource>],
    ) -> LoadResult<RunSummary> {
        self.settings.validate()?;
        let runs = RunStore::new(self.pool.clone());
        let mut run = runs.get(run_id).await?;

        if run.status == RunStatus::Completed {
            return Err(LoadError::RunState {
                run_id: run_id.to_string(),
                action: "resumed",
                status: run.status.to_string(),
            });
        }

        // A process that died mid-run leaves its run `running` (or `resumed`)
        if matches!(run.status, RunStatus::Running | RunStatus::Resumed) {
            warn!(run_id, status = %run.status, "Run was interrupted, marking it failed first");
            run = runs.transition(run_id, RunStatus::Failed).await?;
        }
        run = runs.transition(run_id, RunStatus::Resumed).await?;

        if run.config_hash != self.config_hash {
            warn!(
                run_id,
                original = %run.config_hash,
                current = %self.config_hash,
                "Configuration changed since the run started; batch boundaries may differ"
            );
        }

        let completed = runs.completed_studies(run_id).await?;
        info!(run_id, completed = completed.len(), studies = sources.len(), "Run resumed");

        let summary = self
            .orchestrator()
            .run_all(run_id, sources, &completed, StudyStart::Resume)
            .await;
        self.finish(&runs, &run, summary).await
    }

    async fn finish(
        &self,
        runs: &RunStore,
        run: &RunRecord,
        summary: LoadResult<RunSummary>,
    ) -> LoadResult<RunSummary> {
        let status = match &summary {
            Ok(summary) if summary.all_completed() => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        runs.transition(&run.run_id, status).await?;

        match &summary {
            Ok(summary) => info!(
                run_id = %run.run_id,
                status = %status,
                completed = summary.completed().count(),
                failed = summary.failed().count(),
                elapsed_ms = summary.elapsed_ms,
                "Run ended"
            ),
            Err(e) => warn!(run_id = %run.run_id, error = %e, "Run aborted"),
        }
        summary
    }
}
