//! Table catalogue
//!
//! Describes, per warehouse table, which columns form the natural key, which
//! are plain attributes, and which reference other tables. The identity
//! resolver and batch committer are driven entirely by these descriptions.

use gxw_common::types::{AttrValue, KeyPart, StagedRow, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Float,
    /// Surrogate key of another table, supplied as that table's natural key
    Ref(TableId),
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn text(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Text }
}

const fn float(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Float }
}

const fn reference(name: &'static str, table: TableId) -> Column {
    Column { name, kind: ColumnKind::Ref(table) }
}

#[derive(Debug)]
pub struct TableSpec {
    pub table: TableId,
    pub surrogate: &'static str,
    pub natural: &'static [Column],
    pub attributes: &'static [Column],
    /// Column recording which run inserted the row, for rollback
    pub provenance: Option<&'static str>,
}

static PLATFORM: TableSpec = TableSpec {
    table: TableId::Platform,
    surrogate: "platform_key",
    natural: &[text("platform_accession")],
    attributes: &[],
    provenance: None,
};

static ILLNESS: TableSpec = TableSpec {
    table: TableId::Illness,
    surrogate: "illness_key",
    natural: &[text("illness_label")],
    attributes: &[],
    provenance: None,
};

static GENE: TableSpec = TableSpec {
    table: TableId::Gene,
    surrogate: "gene_key",
    natural: &[text("ensembl_id")],
    attributes: &[],
    provenance: None,
};

static STUDY: TableSpec = TableSpec {
    table: TableId::Study,
    surrogate: "study_key",
    natural: &[text("gse_accession")],
    attributes: &[],
    provenance: None,
};

static SAMPLE: TableSpec = TableSpec {
    table: TableId::Sample,
    surrogate: "sample_key",
    natural: &[text("gsm_accession"), reference("study_key", TableId::Study)],
    attributes: &[
        reference("platform_key", TableId::Platform),
        reference("illness_key", TableId::Illness),
        text("age"),
        text("sex"),
    ],
    provenance: None,
};

static EXPRESSION: TableSpec = TableSpec {
    table: TableId::Expression,
    surrogate: "expression_key",
    natural: &[
        reference("sample_key", TableId::Sample),
        reference("gene_key", TableId::Gene),
        reference("study_key", TableId::Study),
    ],
    attributes: &[float("expression_value")],
    provenance: Some("run_id"),
};

pub fn spec(table: TableId) -> &'static TableSpec {
    match table {
        TableId::Platform => &PLATFORM,
        TableId::Illness => &ILLNESS,
        TableId::Gene => &GENE,
        TableId::Study => &STUDY,
        TableId::Sample => &SAMPLE,
        TableId::Expression => &EXPRESSION,
    }
}

impl TableSpec {
    pub fn name(&self) -> &'static str {
        self.table.as_str()
    }

    /// `SELECT surrogate FROM table WHERE k1 = $1 AND k2 = $2 ...`
    pub fn lookup_sql(&self) -> String {
        let predicate = self
            .natural
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ${}", column.name, i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("SELECT {} FROM {} WHERE {}", self.surrogate, self.name(), predicate)
    }

    /// Insert that yields the new surrogate key, or no row when another
    /// writer already holds the natural key.
    pub fn insert_sql(&self) -> String {
        let mut columns = self
            .natural
            .iter()
            .chain(self.attributes)
            .map(|c| c.name)
            .collect::<Vec<_>>();
        if let Some(provenance) = self.provenance {
            columns.push(provenance);
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict = self
            .natural
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING RETURNING {}",
            self.name(),
            columns.join(", "),
            placeholders,
            conflict,
            self.surrogate
        )
    }

    /// Whether a staged row has the shape this table expects.
    ///
    /// Rows that do not conform, or whose key has a blank component, are
    /// malformed and never reach the database.
    pub fn accepts(&self, row: &StagedRow) -> bool {
        if row.key.table != self.table || row.key.is_blank() {
            return false;
        }
        if row.key.parts.len() != self.natural.len() || row.attributes.len() != self.attributes.len()
        {
            return false;
        }

        let key_ok = self.natural.iter().zip(&row.key.parts).all(|(column, part)| {
            match (column.kind, part) {
                (ColumnKind::Text, KeyPart::Text(_)) => true,
                (ColumnKind::Ref(table), KeyPart::Ref(key)) => key.table == table,
                _ => false,
            }
        });

        let attributes_ok = self.attributes.iter().zip(&row.attributes).all(|(column, value)| {
            match (column.kind, value) {
                (ColumnKind::Text, AttrValue::Text(_)) => true,
                (ColumnKind::Float, AttrValue::Float(v)) => v.is_finite(),
                (ColumnKind::Ref(table), AttrValue::Ref(key)) => key.table == table && !key.is_blank(),
                _ => false,
            }
        });

        key_ok && attributes_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gxw_common::types::{NaturalKey, SampleAttributes};

    #[test]
    fn test_lookup_sql_for_compound_key() {
        assert_eq!(
            spec(TableId::Sample).lookup_sql(),
            "SELECT sample_key FROM dim_sample WHERE gsm_accession = $1 AND study_key = $2"
        );
    }

    #[test]
    fn test_insert_sql_includes_provenance() {
        assert_eq!(
            spec(TableId::Expression).insert_sql(),
            "INSERT INTO fact_expression (sample_key, gene_key, study_key, expression_value, run_id) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (sample_key, gene_key, study_key) DO NOTHING \
             RETURNING expression_key"
        );
        assert_eq!(
            spec(TableId::Gene).insert_sql(),
            "INSERT INTO dim_gene (ensembl_id) VALUES ($1) ON CONFLICT (ensembl_id) DO NOTHING RETURNING gene_key"
        );
    }

    #[test]
    fn test_accepts_well_formed_rows() {
        let sample = SampleAttributes {
            gsm_accession: "GSM1".into(),
            gse_accession: "GSE1".into(),
            platform_accession: "GPL570".into(),
            illness_label: "UNKNOWN".into(),
            age: "40".into(),
            sex: "F".into(),
        };
        assert!(spec(TableId::Sample).accepts(&StagedRow::sample(&sample)));
        assert!(spec(TableId::Expression).accepts(&StagedRow::expression("GSM1", "G", "GSE1", 0.5)));
        assert!(spec(TableId::Gene).accepts(&StagedRow::gene("ENSG1")));
    }

    #[test]
    fn test_rejects_malformed_rows() {
        assert!(!spec(TableId::Gene).accepts(&StagedRow::gene(" ")));
        assert!(!spec(TableId::Gene).accepts(&StagedRow::study("GSE1")));
        assert!(!spec(TableId::Expression)
            .accepts(&StagedRow::expression("GSM1", "G", "GSE1", f64::NAN)));

        let short = StagedRow::new(NaturalKey::sample("GSM1", "GSE1"), vec![]);
        assert!(!spec(TableId::Sample).accepts(&short));
    }
}
