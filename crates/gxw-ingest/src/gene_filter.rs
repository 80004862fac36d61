//! Gene whitelist

use std::collections::HashSet;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::metadata::tsv_reader;

const ID_COLUMN: &str = "ensembl_id";

/// Set of accepted Ensembl gene ids
#[derive(Debug, Clone, Default)]
pub struct GeneFilter {
    ids: HashSet<String>,
}

impl GeneFilter {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Load a TSV with an `ensembl_id` column; blank cells are ignored
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = tsv_reader(path)?;
        let headers = reader.headers().map_err(|e| IngestError::tsv(path, e))?;
        let Some(column) = headers.iter().position(|h| h.trim() == ID_COLUMN) else {
            return Err(IngestError::GeneFilter {
                path: path.to_path_buf(),
                reason: format!("missing '{ID_COLUMN}' column"),
            });
        };

        let mut ids = HashSet::new();
        for record in reader.records() {
            let record = record.map_err(|e| IngestError::tsv(path, e))?;
            if let Some(id) = record.get(column).map(str::trim).filter(|id| !id.is_empty()) {
                ids.insert(id.to_string());
            }
        }

        if ids.is_empty() {
            return Err(IngestError::GeneFilter {
                path: path.to_path_buf(),
                reason: "no gene identifiers".to_string(),
            });
        }
        Ok(Self { ids })
    }

    pub fn contains(&self, ensembl_id: &str) -> bool {
        self.ids.contains(ensembl_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tsv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_loads_ids_from_named_column() {
        let file = write_tsv("symbol\tensembl_id\nTP53\tENSG00000141510\nX\t \nBRCA1\tENSG00000012048\n");
        let filter = GeneFilter::from_path(file.path()).unwrap();
        assert_eq!(filter.len(), 2);
        assert!(filter.contains("ENSG00000141510"));
        assert!(!filter.contains("TP53"));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let file = write_tsv("gene_id\nENSG1\n");
        assert!(matches!(
            GeneFilter::from_path(file.path()),
            Err(IngestError::GeneFilter { .. })
        ));
    }

    #[test]
    fn test_empty_whitelist_is_an_error() {
        let file = write_tsv("ensembl_id\n\n");
        let err = GeneFilter::from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("no gene identifiers"));
    }
}
