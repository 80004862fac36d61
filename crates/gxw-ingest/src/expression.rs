//! Expression matrix parsing and whitelist filtering

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::gene_filter::GeneFilter;
use crate::metadata::tsv_reader;

const GENE_COLUMNS: [&str; 2] = ["gene", "ensembl_id"];

/// One accepted cell of the matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionValue {
    pub ensembl_id: String,
    pub gsm_accession: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpressionStats {
    pub genes_seen: usize,
    pub genes_kept: usize,
    pub duplicate_genes: usize,
    pub invalid_values: usize,
    /// Metadata samples with no column in the matrix
    pub missing_samples: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionReadout {
    pub values: Vec<ExpressionValue>,
    pub stats: ExpressionStats,
}

/// Validate the matrix header and return its sample columns
pub fn check_expression_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(|e| IngestError::tsv(path, e))?;
    sample_columns(path, headers)
}

fn sample_columns(path: &Path, headers: &csv::StringRecord) -> Result<Vec<String>> {
    let Some(first) = headers.get(0) else {
        return Err(IngestError::expression(path, "file is empty"));
    };
    if !GENE_COLUMNS.contains(&first.trim().to_lowercase().as_str()) {
        return Err(IngestError::expression(
            path,
            format!("first column must be one of {GENE_COLUMNS:?}, found '{first}'"),
        ));
    }
    if headers.len() < 2 {
        return Err(IngestError::expression(path, "no sample columns after the gene column"));
    }
    Ok(headers.iter().skip(1).map(|h| h.trim().to_string()).collect())
}

/// Read whitelisted expression values for the given samples.
///
/// Values come out in file row order, then header column order. Header
/// columns that are not among `samples` are ignored.
pub fn load_expression(
    path: &Path,
    filter: &GeneFilter,
    samples: &[String],
) -> Result<ExpressionReadout> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(|e| IngestError::tsv(path, e))?.clone();
    let columns = sample_columns(path, &headers)?;

    let header_set: HashSet<&str> = columns.iter().map(String::as_str).collect();
    let wanted: HashSet<&str> = samples.iter().map(String::as_str).collect();

    let mut readout = ExpressionReadout::default();
    readout.stats.missing_samples = samples
        .iter()
        .filter(|s| !header_set.contains(s.as_str()))
        .cloned()
        .collect();
    if !readout.stats.missing_samples.is_empty() {
        warn!(
            path = %path.display(),
            missing = ?readout.stats.missing_samples,
            "Expression file is missing metadata samples"
        );
    }
    if !columns.iter().any(|c| wanted.contains(c.as_str())) {
        return Err(IngestError::expression(
            path,
            "none of the metadata samples has a column in the matrix",
        ));
    }

    let mut seen_genes = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::tsv(path, e))?;
        let Some(gene) = record.get(0).map(str::trim).filter(|g| !g.is_empty()) else {
            continue;
        };
        readout.stats.genes_seen += 1;

        if !filter.contains(gene) {
            continue;
        }
        if !seen_genes.insert(gene.to_string()) {
            readout.stats.duplicate_genes += 1;
            continue;
        }
        readout.stats.genes_kept += 1;

        for (sample, raw) in columns.iter().zip(record.iter().skip(1)) {
            if !wanted.contains(sample.as_str()) {
                continue;
            }
            match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => readout.values.push(ExpressionValue {
                    ensembl_id: gene.to_string(),
                    gsm_accession: sample.clone(),
                    value,
                }),
                _ => {
                    readout.stats.invalid_values += 1;
                    warn!(gene = %gene, sample = %sample, value = %raw, "Skipping invalid expression value");
                }
            }
        }
    }

    Ok(readout)
}
