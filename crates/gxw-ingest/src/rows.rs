//! Assembly of one study's staged rows

use gxw_common::types::{StagedRow, StudyRows, TableId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::discovery::DiscoveredStudy;
use crate::error::Result;
use crate::expression::{load_expression, ExpressionStats};
use crate::gene_filter::GeneFilter;
use crate::mapping::FieldMappings;
use crate::metadata::{load_metadata, MetadataQuality};

/// Rows for one study plus what parsing observed along the way
#[derive(Debug, Clone)]
pub struct StudyReadout {
    pub rows: StudyRows,
    pub quality: MetadataQuality,
    pub expression: ExpressionStats,
}

/// Counts of distinct entities a study contributes, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StudyShape {
    pub samples: usize,
    pub genes: usize,
    pub facts: usize,
}

impl StudyReadout {
    pub fn shape(&self) -> StudyShape {
        StudyShape {
            samples: self.rows.samples.len(),
            genes: self.rows.genes.len(),
            facts: self.rows.expression.len(),
        }
    }
}

/// Collects rows for one dimension, dropping repeats of a natural key
struct DistinctRows {
    seen: HashSet<String>,
}

impl DistinctRows {
    fn new() -> Self {
        Self { seen: HashSet::new() }
    }

    fn push(&mut self, out: &mut Vec<StagedRow>, id: &str, make: impl FnOnce() -> StagedRow) {
        if self.seen.insert(id.to_string()) {
            out.push(make());
        }
    }
}

/// Parse a study's files into staged rows.
///
/// Dimension rows appear in first-seen order; facts follow the matrix
/// (gene rows, then sample columns). Identical files always yield identical
/// rows in identical order, which keeps batch indices stable on resume.
pub fn build_study_rows(
    study: &DiscoveredStudy,
    filter: &GeneFilter,
    mappings: &FieldMappings,
) -> Result<StudyReadout> {
    let (samples, quality) = load_metadata(&study.metadata_path, mappings)?;

    let mut rows = StudyRows::new(&study.accession);
    let mut platforms = DistinctRows::new();
    let mut illnesses = DistinctRows::new();
    let mut studies = DistinctRows::new();
    let mut sample_ids = DistinctRows::new();
    let mut sample_study = HashMap::new();

    for sample in &samples {
        platforms.push(rows.rows_mut(TableId::Platform), &sample.platform_accession, || {
            StagedRow::platform(&sample.platform_accession)
        });
        illnesses.push(rows.rows_mut(TableId::Illness), &sample.illness_label, || {
            StagedRow::illness(&sample.illness_label)
        });
        studies.push(rows.rows_mut(TableId::Study), &sample.gse_accession, || {
            StagedRow::study(&sample.gse_accession)
        });
        sample_ids.push(rows.rows_mut(TableId::Sample), &sample.gsm_accession, || {
            StagedRow::sample(sample)
        });
        sample_study
            .entry(sample.gsm_accession.clone())
            .or_insert_with(|| sample.gse_accession.clone());
    }

    let sample_order = samples
        .iter()
        .map(|s| s.gsm_accession.clone())
        .collect::<Vec<_>>();
    let readout = load_expression(&study.expression_path, filter, &sample_order)?;

    let mut genes = DistinctRows::new();
    for cell in readout.values {
        genes.push(rows.rows_mut(TableId::Gene), &cell.ensembl_id, || {
            StagedRow::gene(&cell.ensembl_id)
        });
        if let Some(gse) = sample_study.get(&cell.gsm_accession) {
            rows.expression.push(StagedRow::expression(
                cell.gsm_accession,
                cell.ensembl_id,
                gse.clone(),
                cell.value,
            ));
        }
    }

    debug!(
        study_id = %study.accession,
        samples = rows.samples.len(),
        genes = rows.genes.len(),
        facts = rows.expression.len(),
        "Assembled study rows"
    );

    Ok(StudyReadout {
        rows,
        quality,
        expression: readout.stats,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gxw_common::types::{AttrValue, NaturalKey};
    use std::fs;
    use tempfile::TempDir;

    fn write_study(dir: &TempDir) -> DiscoveredStudy {
        let metadata_path = dir.path().join("metadata_GSE1.tsv");
        let expression_path = dir.path().join("expression_GSE1.tsv");
        fs::write(
            &metadata_path,
            "refinebio_accession_code\texperiment_accession\trefinebio_platform\trefinebio_disease\trefinebio_age\trefinebio_sex\n\
             GSM1\tGSE1\tGPL570\tasthma\t40\tmale\n\
             GSM2\tGSE1\tGPL570\t\t\tfemale\n\
             GSM1\tGSE1\tGPL570\tasthma\t40\tmale\n",
        )
        .unwrap();
        fs::write(
            &expression_path,
            "gene\tGSM1\tGSM2\n\
             ENSG1\t1.0\t2.0\n\
             ENSG2\t3.0\t4.0\n\
             ENSG3\t5.0\t6.0\n",
        )
        .unwrap();
        DiscoveredStudy {
            accession: "GSE1".to_string(),
            directory: dir.path().to_path_buf(),
            metadata_path,
            expression_path,
        }
    }

    #[test]
    fn test_builds_deduplicated_dimensions_and_facts() {
        let dir = TempDir::new().unwrap();
        let study = write_study(&dir);
        let filter = GeneFilter::from_ids(["ENSG1", "ENSG3"]);

        let readout = build_study_rows(&study, &filter, &FieldMappings::default()).unwrap();
        let rows = &readout.rows;

        assert_eq!(rows.study_id, "GSE1");
        assert_eq!(rows.platforms, vec![StagedRow::platform("GPL570")]);
        assert_eq!(
            rows.illnesses,
            vec![StagedRow::illness("asthma"), StagedRow::illness("UNKNOWN")]
        );
        assert_eq!(rows.studies, vec![StagedRow::study("GSE1")]);
        assert_eq!(rows.samples.len(), 2);
        assert_eq!(rows.genes, vec![StagedRow::gene("ENSG1"), StagedRow::gene("ENSG3")]);
        assert_eq!(readout.shape(), StudyShape { samples: 2, genes: 2, facts: 4 });

        assert_eq!(
            rows.expression[1].key,
            NaturalKey::expression("GSM2", "ENSG1", "GSE1")
        );
        assert_eq!(rows.expression[1].attributes, vec![AttrValue::Float(2.0)]);
    }

    #[test]
    fn test_rebuilding_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let study = write_study(&dir);
        let filter = GeneFilter::from_ids(["ENSG1", "ENSG2", "ENSG3"]);

        let first = build_study_rows(&study, &filter, &FieldMappings::default()).unwrap();
        let second = build_study_rows(&study, &filter, &FieldMappings::default()).unwrap();
        assert_eq!(first.rows, second.rows);
    }
}
