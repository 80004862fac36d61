//! Staged row model shared by ingestion and loading
//!
//! Ingestion turns study files into [`StagedRow`]s keyed by *natural* keys
//! (accessions and gene ids). The warehouse loader translates those into
//! surrogate keys. A row refers to another dimension by embedding that
//! dimension's natural key ([`KeyPart::Ref`] / [`AttrValue::Ref`]), so rows
//! carry no database identifiers at all and can be replayed across runs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GxwError, Result};

/// Sentinel stored when a metadata field has no usable value
pub const UNKNOWN_VALUE: &str = "UNKNOWN";

/// Warehouse tables that receive staged rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableId {
    Platform,
    Illness,
    Gene,
    Study,
    Sample,
    Expression,
}

impl TableId {
    /// Dimension tables in dependency order
    pub const DIMENSIONS: [TableId; 5] = [
        TableId::Platform,
        TableId::Illness,
        TableId::Gene,
        TableId::Study,
        TableId::Sample,
    ];

    /// Every table in the order a study must load them
    pub const LOAD_ORDER: [TableId; 6] = [
        TableId::Platform,
        TableId::Illness,
        TableId::Gene,
        TableId::Study,
        TableId::Sample,
        TableId::Expression,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableId::Platform => "dim_platform",
            TableId::Illness => "dim_illness",
            TableId::Gene => "dim_gene",
            TableId::Study => "dim_study",
            TableId::Sample => "dim_sample",
            TableId::Expression => "fact_expression",
        }
    }

    pub fn is_dimension(&self) -> bool {
        !matches!(self, TableId::Expression)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TableId {
    type Err = GxwError;

    fn from_str(s: &str) -> Result<Self> {
        TableId::LOAD_ORDER
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| GxwError::UnknownTable(s.to_string()))
    }
}

/// One component of a natural key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Text(String),
    /// Another table's row, identified by its own natural key
    Ref(NaturalKey),
}

/// Natural key of a row: the business identity the warehouse deduplicates on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub table: TableId,
    pub parts: Vec<KeyPart>,
}

impl NaturalKey {
    pub fn text(table: TableId, value: impl Into<String>) -> Self {
        Self {
            table,
            parts: vec![KeyPart::Text(value.into())],
        }
    }

    pub fn platform(accession: impl Into<String>) -> Self {
        Self::text(TableId::Platform, accession)
    }

    pub fn illness(label: impl Into<String>) -> Self {
        Self::text(TableId::Illness, label)
    }

    pub fn gene(ensembl_id: impl Into<String>) -> Self {
        Self::text(TableId::Gene, ensembl_id)
    }

    pub fn study(gse_accession: impl Into<String>) -> Self {
        Self::text(TableId::Study, gse_accession)
    }

    /// Samples are unique per study: `(gsm_accession, study)`
    pub fn sample(gsm_accession: impl Into<String>, gse_accession: impl Into<String>) -> Self {
        Self {
            table: TableId::Sample,
            parts: vec![
                KeyPart::Text(gsm_accession.into()),
                KeyPart::Ref(Self::study(gse_accession)),
            ],
        }
    }

    /// Facts are unique per `(sample, gene, study)`
    pub fn expression(
        gsm_accession: impl Into<String>,
        ensembl_id: impl Into<String>,
        gse_accession: impl Into<String>,
    ) -> Self {
        let gse_accession = gse_accession.into();
        Self {
            table: TableId::Expression,
            parts: vec![
                KeyPart::Ref(Self::sample(gsm_accession, gse_accession.clone())),
                KeyPart::Ref(Self::gene(ensembl_id)),
                KeyPart::Ref(Self::study(gse_accession)),
            ],
        }
    }

    /// A key is malformed when any text component, at any depth, is blank
    pub fn is_blank(&self) -> bool {
        self.parts.is_empty()
            || self.parts.iter().any(|part| match part {
                KeyPart::Text(value) => value.trim().is_empty(),
                KeyPart::Ref(inner) => inner.is_blank(),
            })
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match part {
                KeyPart::Text(value) => write!(f, "{value}")?,
                KeyPart::Ref(inner) => write!(f, "{inner}")?,
            }
        }
        f.write_str(")")
    }
}

/// Non-key column value of a staged row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Text(String),
    Float(f64),
    Ref(NaturalKey),
}

/// One row destined for a warehouse table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRow {
    pub key: NaturalKey,
    /// Values for the table's attribute columns, in catalogue order
    pub attributes: Vec<AttrValue>,
}

impl StagedRow {
    pub fn new(key: NaturalKey, attributes: Vec<AttrValue>) -> Self {
        Self { key, attributes }
    }

    pub fn table(&self) -> TableId {
        self.key.table
    }

    pub fn platform(accession: impl Into<String>) -> Self {
        Self::new(NaturalKey::platform(accession), Vec::new())
    }

    pub fn illness(label: impl Into<String>) -> Self {
        Self::new(NaturalKey::illness(label), Vec::new())
    }

    pub fn gene(ensembl_id: impl Into<String>) -> Self {
        Self::new(NaturalKey::gene(ensembl_id), Vec::new())
    }

    pub fn study(gse_accession: impl Into<String>) -> Self {
        Self::new(NaturalKey::study(gse_accession), Vec::new())
    }

    pub fn sample(sample: &SampleAttributes) -> Self {
        Self::new(
            NaturalKey::sample(&sample.gsm_accession, &sample.gse_accession),
            vec![
                AttrValue::Ref(NaturalKey::platform(&sample.platform_accession)),
                AttrValue::Ref(NaturalKey::illness(&sample.illness_label)),
                AttrValue::Text(sample.age.clone()),
                AttrValue::Text(sample.sex.clone()),
            ],
        )
    }

    pub fn expression(
        gsm_accession: impl Into<String>,
        ensembl_id: impl Into<String>,
        gse_accession: impl Into<String>,
        value: f64,
    ) -> Self {
        Self::new(
            NaturalKey::expression(gsm_accession, ensembl_id, gse_accession),
            vec![AttrValue::Float(value)],
        )
    }
}

/// Resolved metadata of one sample, after field mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAttributes {
    pub gsm_accession: String,
    pub gse_accession: String,
    pub platform_accession: String,
    pub illness_label: String,
    pub age: String,
    pub sex: String,
}

/// Everything one study contributes to the warehouse, per table, in a stable
/// order. Identical input files always produce identical `StudyRows`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyRows {
    pub study_id: String,
    pub platforms: Vec<StagedRow>,
    pub illnesses: Vec<StagedRow>,
    pub genes: Vec<StagedRow>,
    pub studies: Vec<StagedRow>,
    pub samples: Vec<StagedRow>,
    pub expression: Vec<StagedRow>,
}

impl StudyRows {
    pub fn new(study_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            ..Default::default()
        }
    }

    pub fn rows(&self, table: TableId) -> &[StagedRow] {
        match table {
            TableId::Platform => &self.platforms,
            TableId::Illness => &self.illnesses,
            TableId::Gene => &self.genes,
            TableId::Study => &self.studies,
            TableId::Sample => &self.samples,
            TableId::Expression => &self.expression,
        }
    }

    pub fn rows_mut(&mut self, table: TableId) -> &mut Vec<StagedRow> {
        match table {
            TableId::Platform => &mut self.platforms,
            TableId::Illness => &mut self.illnesses,
            TableId::Gene => &mut self.genes,
            TableId::Study => &mut self.studies,
            TableId::Sample => &mut self.samples,
            TableId::Expression => &mut self.expression,
        }
    }

    pub fn total_rows(&self) -> usize {
        TableId::LOAD_ORDER.iter().map(|t| self.rows(*t).len()).sum()
    }
}
