//! Sample metadata parsing

use gxw_common::types::SampleAttributes;
use gxw_common::UNKNOWN_VALUE;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::mapping::{resolve_field, FieldMappings};

pub const GSM_COLUMN: &str = "refinebio_accession_code";
pub const GSE_COLUMN: &str = "experiment_accession";

/// Share of samples with a known age and sex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetadataQuality {
    pub total_samples: usize,
    pub complete_age: usize,
    pub complete_sex: usize,
    /// Rows dropped because they had no GSM accession
    pub skipped_rows: usize,
}

impl MetadataQuality {
    pub fn age_completion(&self) -> f64 {
        ratio(self.complete_age, self.total_samples)
    }

    pub fn sex_completion(&self) -> f64 {
        ratio(self.complete_sex, self.total_samples)
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64
}

pub(crate) fn tsv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .map_err(|e| IngestError::tsv(path, e))
}

/// Check the header of a metadata file without reading its rows
pub fn check_metadata_header(path: &Path) -> Result<()> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers().map_err(|e| IngestError::tsv(path, e))?;
    require_columns(path, headers)
}

fn require_columns(path: &Path, headers: &csv::StringRecord) -> Result<()> {
    let missing = [GSM_COLUMN, GSE_COLUMN]
        .into_iter()
        .filter(|required| !headers.iter().any(|h| h.trim() == *required))
        .map(str::to_string)
        .collect::<Vec<_>>();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::MetadataColumns {
            path: path.to_path_buf(),
            missing,
        })
    }
}

/// Parse a metadata TSV into resolved sample attributes, in file order.
pub fn load_metadata(
    path: &Path,
    mappings: &FieldMappings,
) -> Result<(Vec<SampleAttributes>, MetadataQuality)> {
    let mut reader = tsv_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| IngestError::tsv(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<csv::StringRecord>();
    require_columns(path, &headers)?;

    let mut samples = Vec::new();
    let mut quality = MetadataQuality::default();

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| IngestError::tsv(path, e))?;
        let row: HashMap<&str, &str> = headers.iter().zip(record.iter()).collect();

        let gsm = row.get(GSM_COLUMN).map(|v| v.trim()).unwrap_or_default();
        if gsm.is_empty() {
            warn!(path = %path.display(), line = line + 2, "Skipping metadata row without GSM accession");
            quality.skipped_rows += 1;
            continue;
        }

        let gse = row
            .get(GSE_COLUMN)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_VALUE);

        let sample = SampleAttributes {
            gsm_accession: gsm.to_string(),
            gse_accession: gse.to_string(),
            platform_accession: resolve_field(&row, &mappings.platform_fields),
            illness_label: resolve_field(&row, &mappings.illness_fields),
            age: resolve_field(&row, &mappings.age_fields),
            sex: resolve_field(&row, &mappings.sex_fields),
        };

        if sample.age != UNKNOWN_VALUE {
            quality.complete_age += 1;
        }
        if sample.sex != UNKNOWN_VALUE {
            quality.complete_sex += 1;
        }
        samples.push(sample);
    }

    quality.total_samples = samples.len();
    Ok((samples, quality))
}
