//! Study source backed by files on disk

use anyhow::Context;
use async_trait::async_trait;
use gxw_common::types::StudyRows;
use gxw_ingest::discovery::DiscoveredStudy;
use gxw_ingest::gene_filter::GeneFilter;
use gxw_ingest::mapping::FieldMappings;
use gxw_ingest::rows::{build_study_rows, StudyReadout};
use gxw_warehouse::load::StudySource;
use std::sync::Arc;
use tracing::{info, warn};

/// Parses one discovered study when the orchestrator asks for its rows
pub struct FileStudySource {
    study: DiscoveredStudy,
    filter: Arc<GeneFilter>,
    mappings: Arc<FieldMappings>,
    log_data_quality: bool,
}

impl FileStudySource {
    pub fn new(
        study: DiscoveredStudy,
        filter: Arc<GeneFilter>,
        mappings: Arc<FieldMappings>,
        log_data_quality: bool,
    ) -> Self {
        Self {
            study,
            filter,
            mappings,
            log_data_quality,
        }
    }

    fn log_quality(&self, readout: &StudyReadout) {
        let quality = &readout.quality;
        info!(
            study_id = %self.study.accession,
            samples = quality.total_samples,
            age_completion = quality.age_completion(),
            sex_completion = quality.sex_completion(),
            skipped_rows = quality.skipped_rows,
            genes_kept = readout.expression.genes_kept,
            invalid_values = readout.expression.invalid_values,
            "Metadata quality"
        );
        if !readout.expression.missing_samples.is_empty() {
            warn!(
                study_id = %self.study.accession,
                missing = readout.expression.missing_samples.len(),
                "Samples without an expression column"
            );
        }
    }
}

#[async_trait]
impl StudySource for FileStudySource {
    fn study_id(&self) -> &str {
        &self.study.accession
    }

    async fn load(&self) -> anyhow::Result<StudyRows> {
        let study = self.study.clone();
        let filter = Arc::clone(&self.filter);
        let mappings = Arc::clone(&self.mappings);

        // TSV parsing is blocking file I/O
        let readout = tokio::task::spawn_blocking(move || {
            build_study_rows(&study, &filter, &mappings)
        })
        .await
        .context("Study parser task failed")?
        .with_context(|| format!("Failed to read study {}", self.study.accession))?;

        if self.log_data_quality {
            self.log_quality(&readout);
        }
        Ok(readout.rows)
    }
}
