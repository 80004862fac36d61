//! Per-study correlation refresh
//!
//! Each study is loaded from `fact_expression`, its samples are grouped by
//! illness, and every gene pair with enough shared samples gets a Spearman
//! rho, p-value and Benjamini-Hochberg q-value (adjusted within the illness
//! group). A study's previous correlations are deleted and the new ones
//! inserted in one transaction. Studies run one at a time; a failed study is
//! recorded and the job moves on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, Row};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stats::{benjamini_hochberg, spearman};
use crate::error::{LoadError, LoadResult};
use crate::load::retry::{with_retry, RetryPolicy};

/// Fewest shared samples a gene pair needs
pub const DEFAULT_MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    pub min_samples: usize,
    pub retry: RetryPolicy,
    pub log_processing_time: bool,
    pub log_record_counts: bool,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            retry: RetryPolicy::default(),
            log_processing_time: true,
            log_record_counts: true,
        }
    }
}

impl CorrelationSettings {
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> LoadResult<()> {
        // The t approximation needs at least one degree of freedom
        if self.min_samples < DEFAULT_MIN_SAMPLES {
            return Err(LoadError::config(format!(
                "correlation min_samples must be at least {DEFAULT_MIN_SAMPLES}, got {}",
                self.min_samples
            )));
        }
        Ok(())
    }
}

/// Expression values of one study, keyed by surrogate keys
#[derive(Debug, Clone, Default)]
pub struct ExpressionMatrix {
    /// gene_key -> sample_key -> value
    genes: BTreeMap<i64, HashMap<i64, f64>>,
    /// sample_key -> illness_key
    illness_of: BTreeMap<i64, i64>,
    values: usize,
}

impl ExpressionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, gene_key: i64, sample_key: i64, illness_key: i64, value: f64) {
        self.illness_of.insert(sample_key, illness_key);
        if self.genes.entry(gene_key).or_default().insert(sample_key, value).is_none() {
            self.values += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    pub fn sample_count(&self) -> usize {
        self.illness_of.len()
    }

    pub fn illness_count(&self) -> usize {
        self.illness_of.values().collect::<BTreeSet<_>>().len()
    }

    pub fn value_count(&self) -> usize {
        self.values
    }

    /// Samples of each illness, both in key order
    fn samples_by_illness(&self) -> BTreeMap<i64, Vec<i64>> {
        let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (&sample, &illness) in &self.illness_of {
            groups.entry(illness).or_default().push(sample);
        }
        groups
    }
}

/// One row of `fact_gene_pair_corr`; `gene_a_key < gene_b_key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenePairCorrelation {
    pub gene_a_key: i64,
    pub gene_b_key: i64,
    pub illness_key: i64,
    pub rho_spearman: f64,
    pub p_value: f64,
    pub q_value: f64,
    pub n_samples: usize,
}

/// Correlate every gene pair within each illness group of the matrix.
///
/// A group with fewer than `min_samples` samples is skipped, as is a pair
/// with fewer shared samples or a constant side.
pub fn compute_correlations(
    matrix: &ExpressionMatrix,
    min_samples: usize,
) -> Vec<GenePairCorrelation> {
    let genes: Vec<(&i64, &HashMap<i64, f64>)> = matrix.genes.iter().collect();
    let mut correlations = Vec::new();

    for (illness_key, samples) in matrix.samples_by_illness() {
        if samples.len() < min_samples {
            continue;
        }

        let mut pairs = Vec::new();
        let (mut xs, mut ys) = (Vec::new(), Vec::new());
        for (i, (gene_a, values_a)) in genes.iter().enumerate() {
            for (gene_b, values_b) in &genes[i + 1..] {
                xs.clear();
                ys.clear();
                for sample in &samples {
                    if let (Some(a), Some(b)) = (values_a.get(sample), values_b.get(sample)) {
                        xs.push(*a);
                        ys.push(*b);
                    }
                }
                if xs.len() < min_samples {
                    continue;
                }
                if let Some(result) = spearman(&xs, &ys) {
                    pairs.push((**gene_a, **gene_b, xs.len(), result));
                }
            }
        }

        let p_values: Vec<f64> = pairs.iter().map(|(_, _, _, r)| r.p_value).collect();
        let q_values = benjamini_hochberg(&p_values);
        correlations.extend(pairs.into_iter().zip(q_values).map(
            |((gene_a_key, gene_b_key, n_samples, result), q_value)| GenePairCorrelation {
                gene_a_key,
                gene_b_key,
                illness_key,
                rho_spearman: result.rho,
                p_value: result.p_value,
                q_value,
                n_samples,
            },
        ));
    }
    correlations
}

/// A study with facts or stale correlations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTarget {
    pub study_key: i64,
    pub study_id: String,
}

/// Volume and timing of one study's refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyCorrelation {
    pub study_id: String,
    pub study_key: i64,
    pub genes: usize,
    pub samples: usize,
    pub illnesses: usize,
    pub values_loaded: usize,
    pub correlations_written: u64,
    /// Rows of the previous refresh that were deleted
    pub correlations_replaced: u64,
    pub load_ms: u64,
    pub compute_ms: u64,
    pub write_ms: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationFailure {
    pub study_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub studies: Vec<StudyCorrelation>,
    pub failures: Vec<CorrelationFailure>,
    /// Requested accessions with neither facts nor correlations
    pub missing: Vec<String>,
    /// Targets left untouched because the job was cancelled
    pub not_started: Vec<String>,
    pub elapsed_ms: u64,
}

impl CorrelationSummary {
    pub fn study(&self, study_id: &str) -> Option<&StudyCorrelation> {
        self.studies.iter().find(|s| s.study_id == study_id)
    }

    pub fn total_correlations(&self) -> u64 {
        self.studies.iter().map(|s| s.correlations_written).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.not_started.is_empty()
    }
}

pub struct CorrelationJob {
    pool: AnyPool,
    settings: CorrelationSettings,
    cancel: CancellationToken,
}

impl CorrelationJob {
    pub fn new(pool: AnyPool, settings: CorrelationSettings) -> Self {
        Self {
            pool,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Refresh the requested studies, or every study when `requested` is empty
    pub async fn run(&self, requested: &[String]) -> LoadResult<CorrelationSummary> {
        self.settings.validate()?;
        let started = Instant::now();

        let (targets, missing) =
            with_retry(&self.settings.retry, "list correlation targets", || {
                self.targets(requested)
            })
            .await?;

        if !missing.is_empty() {
            warn!(studies = ?missing, "Requested studies have no expression data");
        }
        if targets.is_empty() {
            warn!("No studies with expression data to correlate");
        }
        info!(
            studies = targets.len(),
            min_samples = self.settings.min_samples,
            "Starting correlation refresh"
        );

        let mut summary = CorrelationSummary {
            missing,
            ..Default::default()
        };

        for (position, target) in targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.not_started =
                    targets[position..].iter().map(|t| t.study_id.clone()).collect();
                warn!(remaining = summary.not_started.len(), "Correlation refresh cancelled");
                break;
            }

            match self.refresh_study(target).await {
                Ok(metrics) => {
                    self.log_study(&metrics);
                    summary.studies.push(metrics);
                }
                Err(e) => {
                    error!(study_id = %target.study_id, error = %e, "Correlation refresh failed");
                    summary.failures.push(CorrelationFailure {
                        study_id: target.study_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = summary.studies.len(),
            failed = summary.failures.len(),
            correlations = summary.total_correlations(),
            elapsed_ms = summary.elapsed_ms,
            "Correlation refresh finished"
        );
        Ok(summary)
    }

    /// Studies to refresh, plus the requested accessions that matched none
    pub async fn targets(
        &self,
        requested: &[String],
    ) -> LoadResult<(Vec<StudyTarget>, Vec<String>)> {
        // Studies whose facts were rolled back still hold correlations to clear
        let rows = sqlx::query(
            "SELECT d.study_key AS study_key, d.gse_accession AS gse_accession FROM dim_study d \
             WHERE EXISTS (SELECT 1 FROM fact_expression f WHERE f.study_key = d.study_key) \
             OR EXISTS (SELECT 1 FROM fact_gene_pair_corr c WHERE c.study_key = d.study_key) \
             ORDER BY d.gse_accession",
        )
        .fetch_all(&self.pool)
        .await?;

        let available = rows
            .iter()
            .map(|row| -> LoadResult<StudyTarget> {
                Ok(StudyTarget {
                    study_key: row.try_get("study_key")?,
                    study_id: row.try_get("gse_accession")?,
                })
            })
            .collect::<LoadResult<Vec<_>>>()?;

        if requested.is_empty() {
            return Ok((available, Vec::new()));
        }

        let wanted: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
        let targets: Vec<StudyTarget> = available
            .into_iter()
            .filter(|t| wanted.contains(t.study_id.as_str()))
            .collect();
        let missing = wanted
            .into_iter()
            .filter(|id| !targets.iter().any(|t| t.study_id == *id))
            .map(str::to_string)
            .collect();
        Ok((targets, missing))
    }

    /// Recompute one study and replace its stored correlations
    pub async fn refresh_study(&self, target: &StudyTarget) -> LoadResult<StudyCorrelation> {
        let started = Instant::now();
        debug!(
            study_id = %target.study_id,
            study_key = target.study_key,
            "Refreshing correlations"
        );

        let matrix = with_retry(&self.settings.retry, "load expression matrix", || {
            self.load_matrix(target.study_key)
        })
        .await?;
        let load_ms = started.elapsed().as_millis() as u64;

        let mut metrics = StudyCorrelation {
            study_id: target.study_id.clone(),
            study_key: target.study_key,
            genes: matrix.gene_count(),
            samples: matrix.sample_count(),
            illnesses: matrix.illness_count(),
            values_loaded: matrix.value_count(),
            load_ms,
            ..Default::default()
        };

        // CPU-bound; keep it off the async workers
        let compute_started = Instant::now();
        let min_samples = self.settings.min_samples;
        let correlations =
            tokio::task::spawn_blocking(move || compute_correlations(&matrix, min_samples))
                .await
                .map_err(|e| LoadError::Correlation {
                    study_id: target.study_id.clone(),
                    message: e.to_string(),
                })?;
        metrics.compute_ms = compute_started.elapsed().as_millis() as u64;

        let write_started = Instant::now();
        let computed_at = Utc::now().to_rfc3339();
        metrics.correlations_replaced =
            with_retry(&self.settings.retry, "replace correlations", || {
                self.replace(target.study_key, &correlations, &computed_at)
            })
            .await?;
        metrics.correlations_written = correlations.len() as u64;
        metrics.write_ms = write_started.elapsed().as_millis() as u64;
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;

        if metrics.genes == 0 {
            warn!(
                study_id = %target.study_id,
                cleared = metrics.correlations_replaced,
                "Study has no expression data; cleared its correlations"
            );
        }
        Ok(metrics)
    }

    async fn load_matrix(&self, study_key: i64) -> LoadResult<ExpressionMatrix> {
        let rows = sqlx::query(
            "SELECT f.gene_key AS gene_key, f.sample_key AS sample_key, \
             s.illness_key AS illness_key, f.expression_value AS expression_value \
             FROM fact_expression f JOIN dim_sample s ON s.sample_key = f.sample_key \
             WHERE f.study_key = $1",
        )
        .bind(study_key)
        .fetch_all(&self.pool)
        .await?;

        let mut matrix = ExpressionMatrix::new();
        for row in &rows {
            matrix.insert(
                row.try_get("gene_key")?,
                row.try_get("sample_key")?,
                row.try_get("illness_key")?,
                row.try_get("expression_value")?,
            );
        }
        Ok(matrix)
    }

    /// Delete the study's correlations and insert `correlations` in one
    /// transaction; returns the number deleted
    async fn replace(
        &self,
        study_key: i64,
        correlations: &[GenePairCorrelation],
        computed_at: &str,
    ) -> LoadResult<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM fact_gene_pair_corr WHERE study_key = $1")
            .bind(study_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for c in correlations {
            sqlx::query(
                "INSERT INTO fact_gene_pair_corr \
                 (gene_a_key, gene_b_key, illness_key, study_key, \
                 rho_spearman, p_value, q_value, n_samples, computed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(c.gene_a_key)
            .bind(c.gene_b_key)
            .bind(c.illness_key)
            .bind(study_key)
            .bind(c.rho_spearman)
            .bind(c.p_value)
            .bind(c.q_value)
            .bind(c.n_samples as i64)
            .bind(computed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    fn log_study(&self, metrics: &StudyCorrelation) {
        let elapsed_ms = self.settings.log_processing_time.then_some(metrics.elapsed_ms);
        info!(
            study_id = %metrics.study_id,
            correlations = metrics.correlations_written,
            replaced = metrics.correlations_replaced,
            elapsed_ms,
            "Correlations refreshed"
        );
        if self.settings.log_record_counts {
            info!(
                study_id = %metrics.study_id,
                genes = metrics.genes,
                samples = metrics.samples,
                illnesses = metrics.illnesses,
                values = metrics.values_loaded,
                "Correlation input"
            );
        }
        debug!(
            study_id = %metrics.study_id,
            load_ms = metrics.load_ms,
            compute_ms = metrics.compute_ms,
            write_ms = metrics.write_ms,
            "Correlation timings"
        );
    }
}
