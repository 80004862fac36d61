//! `gxw validate` command implementation
//!
//! Preflight over the input directory: discovery, metadata columns,
//! expression header and the gene whitelist. Nothing touches the database.

use crate::config::GxwConfig;
use crate::error::{CliError, Result};
use crate::output::new_table;
use gxw_ingest::discovery::{discover_studies, DiscoveredStudy};
use gxw_ingest::expression::check_expression_header;
use gxw_ingest::gene_filter::GeneFilter;
use gxw_ingest::metadata::check_metadata_header;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What preflight found for one study
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyFinding {
    pub accession: String,
    /// Sample columns in the expression header, when it parsed
    pub sample_columns: Option<usize>,
    pub problems: Vec<String>,
}

impl StudyFinding {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn check_study(study: &DiscoveredStudy) -> StudyFinding {
    let mut problems = Vec::new();

    if let Err(e) = check_metadata_header(&study.metadata_path) {
        problems.push(e.to_string());
    }
    let sample_columns = match check_expression_header(&study.expression_path) {
        Ok(samples) => Some(samples.len()),
        Err(e) => {
            problems.push(e.to_string());
            None
        }
    };

    debug!(accession = %study.accession, problems = problems.len(), "Checked study");
    StudyFinding {
        accession: study.accession.clone(),
        sample_columns,
        problems,
    }
}

pub async fn run(
    config: &GxwConfig,
    input_dir: Option<PathBuf>,
    gene_filter: Option<PathBuf>,
) -> Result<()> {
    let input_dir = match input_dir {
        Some(dir) => dir,
        None => config.input_directory()?.to_path_buf(),
    };
    let gene_filter = gene_filter.or_else(|| config.processing.gene_filter_file.clone());

    // Parsing is blocking file I/O
    tokio::task::spawn_blocking(move || check_all(&input_dir, gene_filter.as_deref()))
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("Validation task failed: {e}")))?
}

fn check_all(input_dir: &Path, gene_filter: Option<&Path>) -> Result<()> {
    match gene_filter {
        Some(path) => {
            let filter = GeneFilter::from_path(path)?;
            println!("Gene whitelist: {} genes ({})", filter.len(), path.display());
        }
        None => println!("Gene whitelist: not configured, skipped"),
    }

    let plan = discover_studies(input_dir)?;
    let findings = plan.studies.iter().map(check_study).collect::<Vec<_>>();

    if findings.is_empty() {
        println!("No studies found under {}", plan.root.display());
    } else {
        let mut table = new_table(["Study", "Samples", "Status", "Problems"]);
        for finding in &findings {
            table.add_row(vec![
                finding.accession.clone(),
                finding
                    .sample_columns
                    .map_or_else(|| "-".to_string(), |n| n.to_string()),
                if finding.is_valid() { "ok" } else { "invalid" }.to_string(),
                finding.problems.join("\n"),
            ]);
        }
        println!("{table}");
    }

    for skipped in &plan.skipped {
        println!("Skipped {}: {}", skipped.directory.display(), skipped.reason);
    }

    let invalid = findings.iter().filter(|f| !f.is_valid()).count();
    if invalid > 0 {
        return Err(CliError::InvalidStudies {
            invalid,
            total: findings.len(),
        });
    }
    println!("{} studies ready to load", findings.len());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn study(dir: &Path, accession: &str, metadata: &str, expression: &str) -> DiscoveredStudy {
        let metadata_path = dir.join(format!("metadata_{accession}.tsv"));
        let expression_path = dir.join(format!("expression_{accession}.tsv"));
        fs::write(&metadata_path, metadata).unwrap();
        fs::write(&expression_path, expression).unwrap();
        DiscoveredStudy {
            accession: accession.to_string(),
            directory: dir.to_path_buf(),
            metadata_path,
            expression_path,
        }
    }

    #[test]
    fn test_valid_study() {
        let dir = TempDir::new().unwrap();
        let study = study(
            dir.path(),
            "GSE1",
            "refinebio_accession_code\texperiment_accession\nGSM1\tGSE1\n",
            "gene\tGSM1\tGSM2\nENSG1\t1\t2\n",
        );

        let finding = check_study(&study);
        assert!(finding.is_valid());
        assert_eq!(finding.sample_columns, Some(2));
    }

    #[test]
    fn test_reports_every_problem() {
        let dir = TempDir::new().unwrap();
        let study = study(
            dir.path(),
            "GSE2",
            "refinebio_accession_code\nGSM1\n",
            "ID_REF\tGSM1\nX\t1\n",
        );

        let finding = check_study(&study);
        assert_eq!(finding.problems.len(), 2);
        assert!(finding.problems[0].contains("experiment_accession"));
        assert_eq!(finding.sample_columns, None);
    }
}
