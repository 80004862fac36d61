//! End-to-end parsing of a study tree: discovery, whitelist, metadata, matrix

use gxw_common::types::TableId;
use gxw_ingest::discovery::discover_studies;
use gxw_ingest::gene_filter::GeneFilter;
use gxw_ingest::mapping::FieldMappings;
use gxw_ingest::rows::build_study_rows;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gxw_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn write_study(root: &Path, accession: &str, samples: &[&str], genes: &[&str]) {
    let dir = root.join(accession);
    fs::create_dir_all(&dir).unwrap();

    let mut metadata = String::from(
        "refinebio_accession_code\texperiment_accession\tplatform_id\tcharacteristics_ch1_Illness\tMetaSRA_age\tcharacteristics_ch1_Gender\n",
    );
    for (i, gsm) in samples.iter().enumerate() {
        metadata.push_str(&format!("{gsm}\t{accession}\tGPL96\tcopd\t{}\tF\n", 30 + i));
    }
    fs::write(dir.join(format!("metadata_{accession}.tsv")), metadata).unwrap();

    let mut matrix = format!("Gene\t{}\n", samples.join("\t"));
    for (g, gene) in genes.iter().enumerate() {
        let values = (0..samples.len())
            .map(|s| format!("{}.5", g * 10 + s))
            .collect::<Vec<_>>()
            .join("\t");
        matrix.push_str(&format!("{gene}\t{values}\n"));
    }
    fs::write(dir.join(format!("expression_{accession}.tsv")), matrix).unwrap();
}

#[test]
#[allow(clippy::unwrap_used)]
fn test_two_studies_share_dimension_values() {
    init_tracing();
    let root = TempDir::new().unwrap();
    write_study(root.path(), "GSE10", &["GSM1", "GSM2", "GSM3"], &["ENSG1", "ENSG2", "ENSGX"]);
    write_study(root.path(), "GSE20", &["GSM7", "GSM8"], &["ENSG2", "ENSG3"]);

    let plan = discover_studies(root.path()).unwrap();
    assert_eq!(plan.studies.len(), 2);

    let filter = GeneFilter::from_ids(["ENSG1", "ENSG2", "ENSG3"]);
    let mappings = FieldMappings::default();

    let first = build_study_rows(&plan.studies[0], &filter, &mappings).unwrap();
    let second = build_study_rows(&plan.studies[1], &filter, &mappings).unwrap();

    assert_eq!(first.rows.study_id, "GSE10");
    assert_eq!(first.rows.rows(TableId::Gene).len(), 2);
    assert_eq!(first.rows.rows(TableId::Expression).len(), 6);
    assert_eq!(first.quality.complete_age, 3);
    assert_eq!(first.expression.genes_seen, 3);

    assert_eq!(second.rows.rows(TableId::Expression).len(), 4);
    // Both studies stage the same platform and illness rows; the warehouse
    // deduplicates them on load.
    assert_eq!(first.rows.platforms, second.rows.platforms);
    assert_eq!(first.rows.illnesses, second.rows.illnesses);
}
