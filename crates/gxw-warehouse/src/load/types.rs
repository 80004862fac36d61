//! Core types for the load engine

use gxw_common::types::TableId;
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::error::{LoadError, LoadResult};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONCURRENT_STUDIES: usize = 1;

/// Counters for one table load (or a sum of several)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub committed_batches: u64,
    /// Batches already checkpointed by an earlier attempt of the same run
    pub skipped_batches: u64,
    pub rows_written: u64,
    pub rows_deduplicated: u64,
    /// Rows whose referenced dimension row does not exist
    pub rows_rejected: u64,
    /// Rows with a blank natural key or the wrong shape for their table
    pub rows_malformed: u64,
}

impl BatchResult {
    pub fn absorb(&mut self, other: &BatchResult) {
        self.committed_batches += other.committed_batches;
        self.skipped_batches += other.skipped_batches;
        self.rows_written += other.rows_written;
        self.rows_deduplicated += other.rows_deduplicated;
        self.rows_rejected += other.rows_rejected;
        self.rows_malformed += other.rows_malformed;
    }

    pub fn sum<'a>(results: impl IntoIterator<Item = &'a BatchResult>) -> BatchResult {
        let mut total = BatchResult::default();
        for result in results {
            total.absorb(result);
        }
        total
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_written + self.rows_deduplicated + self.rows_rejected + self.rows_malformed
    }
}

/// A table load that stopped before its last batch
#[derive(Debug)]
pub struct TableFailure {
    /// Batch that failed, or the next one due when the load was cancelled
    pub batch_index: usize,
    /// Counters of the batches that did complete
    pub progress: BatchResult,
    pub error: LoadError,
}

/// Lifecycle of one study within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyState {
    Discovered,
    DimensionsLoading,
    FactsLoading,
    Completed,
    Failed,
    Resumed,
}

impl StudyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyState::Discovered => "discovered",
            StudyState::DimensionsLoading => "dimensions_loading",
            StudyState::FactsLoading => "facts_loading",
            StudyState::Completed => "completed",
            StudyState::Failed => "failed",
            StudyState::Resumed => "resumed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StudyState::Completed | StudyState::Failed)
    }

    pub fn can_transition_to(&self, next: StudyState) -> bool {
        use StudyState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Discovered, DimensionsLoading | Resumed) => true,
            (Resumed, DimensionsLoading | FactsLoading) => true,
            (DimensionsLoading, FactsLoading) => true,
            (FactsLoading, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StudyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a study plus the states it went through
#[derive(Debug, Clone)]
pub struct StudyProgress {
    state: StudyState,
    history: Vec<StudyState>,
}

impl Default for StudyProgress {
    fn default() -> Self {
        Self {
            state: StudyState::Discovered,
            history: vec![StudyState::Discovered],
        }
    }
}

impl StudyProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StudyState {
        self.state
    }

    pub fn history(&self) -> &[StudyState] {
        &self.history
    }

    pub fn advance(&mut self, next: StudyState) -> LoadResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(LoadError::InvalidTransition {
                entity: "study",
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Counters for one table of one study
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLoad {
    pub table: TableId,
    pub result: BatchResult,
}

/// Where a failed study stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePoint {
    /// `None` when the study failed before any table load started
    pub table: Option<TableId>,
    pub batch_index: Option<usize>,
    pub last_committed_batch: Option<usize>,
    pub error: String,
}

/// Outcome of one study
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyReport {
    pub study_id: String,
    pub state: StudyState,
    pub resumed: bool,
    pub tables: Vec<TableLoad>,
    pub totals: BatchResult,
    pub elapsed_ms: u64,
    pub failure: Option<FailurePoint>,
}

impl StudyReport {
    pub fn is_completed(&self) -> bool {
        self.state == StudyState::Completed
    }

    pub fn table(&self, table: TableId) -> Option<&BatchResult> {
        self.tables.iter().find(|t| t.table == table).map(|t| &t.result)
    }
}

/// Aggregate of every study in one run invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub studies: Vec<StudyReport>,
    /// Studies a resumed run did not touch because they had already completed
    pub skipped_studies: Vec<String>,
    pub totals: BatchResult,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(
        run_id: impl Into<String>,
        mut studies: Vec<StudyReport>,
        skipped_studies: Vec<String>,
        elapsed_ms: u64,
    ) -> Self {
        studies.sort_by(|a, b| a.study_id.cmp(&b.study_id));
        let totals = BatchResult::sum(studies.iter().map(|s| &s.totals));
        Self {
            run_id: run_id.into(),
            studies,
            skipped_studies,
            totals,
            elapsed_ms,
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = &StudyReport> {
        self.studies.iter().filter(|s| s.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &StudyReport> {
        self.studies.iter().filter(|s| !s.is_completed())
    }

    pub fn all_completed(&self) -> bool {
        self.studies.iter().all(StudyReport::is_completed)
    }

    pub fn study(&self, study_id: &str) -> Option<&StudyReport> {
        self.studies.iter().find(|s| s.study_id == study_id)
    }
}

/// Load engine settings; immutable for the lifetime of a run
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub batch_size: usize,
    pub max_concurrent_studies: usize,
    pub retry: RetryPolicy,
    /// Attach elapsed times to table and study events
    pub log_processing_time: bool,
    /// Emit per-table count events at info level
    pub log_record_counts: bool,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_studies: DEFAULT_MAX_CONCURRENT_STUDIES,
            retry: RetryPolicy::default(),
            log_processing_time: true,
            log_record_counts: true,
        }
    }
}

impl LoadSettings {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrent_studies(mut self, max: usize) -> Self {
        self.max_concurrent_studies = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.batch_size == 0 {
            return Err(LoadError::config("batch_size must be at least 1"));
        }
        if self.max_concurrent_studies == 0 {
            return Err(LoadError::config("max_concurrent_studies must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(LoadError::config("retry policy needs at least one attempt"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_study_state_machine() {
        let mut progress = StudyProgress::new();
        progress.advance(StudyState::DimensionsLoading).unwrap();
        progress.advance(StudyState::FactsLoading).unwrap();
        progress.advance(StudyState::Completed).unwrap();
        assert!(progress.advance(StudyState::Failed).is_err());
        assert_eq!(progress.history().len(), 4);
    }

    #[test]
    fn test_resumed_study_can_enter_facts_directly() {
        let mut progress = StudyProgress::new();
        progress.advance(StudyState::Resumed).unwrap();
        progress.advance(StudyState::FactsLoading).unwrap();
        assert_eq!(progress.state(), StudyState::FactsLoading);
    }

    #[test]
    fn test_facts_cannot_precede_dimensions() {
        let mut progress = StudyProgress::new();
        let err = progress.advance(StudyState::FactsLoading).unwrap_err();
        assert_eq!(err.to_string(), "Invalid study transition: discovered -> facts_loading");
        assert!(!StudyState::Failed.can_transition_to(StudyState::Resumed));
        assert!(StudyState::DimensionsLoading.can_transition_to(StudyState::Failed));
    }

    #[test]
    fn test_batch_result_sum() {
        let a = BatchResult {
            committed_batches: 2,
            rows_written: 1500,
            rows_deduplicated: 500,
            ..Default::default()
        };
        let b = BatchResult {
            skipped_batches: 1,
            rows_rejected: 3,
            rows_malformed: 1,
            ..Default::default()
        };
        let total = BatchResult::sum([&a, &b]);
        assert_eq!(total.committed_batches, 2);
        assert_eq!(total.skipped_batches, 1);
        assert_eq!(total.rows_seen(), 2004);
    }

    #[test]
    fn test_settings_validation() {
        assert!(LoadSettings::default().validate().is_ok());
        assert!(LoadSettings::default().with_batch_size(0).validate().is_err());
        assert!(LoadSettings::default().with_max_concurrent_studies(0).validate().is_err());
    }
}
