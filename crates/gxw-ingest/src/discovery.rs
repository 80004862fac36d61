//! Study discovery
//!
//! Walks the input root and pairs each study's metadata file with its
//! expression matrix. Nothing is parsed here.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

const METADATA_PREFIX: &str = "metadata_";
const EXPRESSION_PREFIX: &str = "expression_";
const TSV_EXTENSION: &str = "tsv";

/// One study directory ready for parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredStudy {
    /// GSE accession taken from `metadata_<accession>.tsv`
    pub accession: String,
    pub directory: PathBuf,
    pub metadata_path: PathBuf,
    pub expression_path: PathBuf,
}

/// A directory that looked like a study but could not be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDirectory {
    pub directory: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPlan {
    pub root: PathBuf,
    pub studies: Vec<DiscoveredStudy>,
    pub skipped: Vec<SkippedDirectory>,
}

impl DiscoveryPlan {
    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }
}

/// Discover studies under `root`, in sorted directory-name order.
///
/// The root itself counts as a study when it holds a metadata file, so a
/// single study directory can be passed directly.
pub fn discover_studies(root: impl AsRef<Path>) -> Result<DiscoveryPlan> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(IngestError::MissingInputRoot(root.to_path_buf()));
    }

    let mut plan = DiscoveryPlan {
        root: root.to_path_buf(),
        studies: Vec::new(),
        skipped: Vec::new(),
    };

    let mut candidates = vec![root.to_path_buf()];
    let mut children = list_dir(root)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    children.sort();
    candidates.extend(children);

    for (position, directory) in candidates.into_iter().enumerate() {
        match inspect_directory(&directory)? {
            Inspection::Study(study) => {
                debug!(accession = %study.accession, directory = %directory.display(), "Discovered study");
                plan.studies.push(study);
            }
            // The root usually holds no metadata file; that is not worth reporting
            Inspection::NotAStudy if position == 0 => {},
            Inspection::NotAStudy => {
                warn!(directory = %directory.display(), "Skipping directory without metadata_*.tsv");
                plan.skipped.push(SkippedDirectory {
                    directory,
                    reason: "no metadata_*.tsv file".to_string(),
                });
            }
            Inspection::MissingExpression(accession) => {
                warn!(directory = %directory.display(), accession = %accession, "Skipping study without expression file");
                plan.skipped.push(SkippedDirectory {
                    directory,
                    reason: format!("no expression file for {accession}"),
                });
            }
        }
    }

    Ok(plan)
}

enum Inspection {
    Study(DiscoveredStudy),
    NotAStudy,
    MissingExpression(String),
}

fn inspect_directory(directory: &Path) -> Result<Inspection> {
    let mut tsv_files = list_dir(directory)?
        .into_iter()
        .filter(|path| path.is_file() && has_tsv_extension(path))
        .collect::<Vec<_>>();
    tsv_files.sort();

    let Some((metadata_path, accession)) = tsv_files.iter().find_map(|path| {
        let accession = file_stem(path)?.strip_prefix(METADATA_PREFIX)?.to_string();
        (!accession.is_empty()).then(|| (path.clone(), accession))
    }) else {
        return Ok(Inspection::NotAStudy);
    };

    let others = tsv_files
        .iter()
        .filter(|path| **path != metadata_path)
        .collect::<Vec<_>>();

    let preferred = format!("{EXPRESSION_PREFIX}{accession}");
    let expression_path = others
        .iter()
        .find(|path| file_stem(path) == Some(preferred.as_str()))
        .or_else(|| {
            others
                .iter()
                .find(|path| file_stem(path).is_some_and(|s| s.starts_with(EXPRESSION_PREFIX)))
        })
        .or_else(|| {
            others.iter().find(|path| {
                file_stem(path).is_some_and(|s| {
                    s.contains(accession.as_str()) && !s.starts_with(METADATA_PREFIX)
                })
            })
        })
        .map(|path| (*path).clone());

    Ok(match expression_path {
        Some(expression_path) => Inspection::Study(DiscoveredStudy {
            accession,
            directory: directory.to_path_buf(),
            metadata_path,
            expression_path,
        }),
        None => Inspection::MissingExpression(accession),
    })
}

fn list_dir(directory: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|e| IngestError::io(directory, e))?;
    entries
        .map(|entry| {
            entry
                .map(|e| e.path())
                .map_err(|e| IngestError::io(directory, e))
        })
        .collect()
}

fn has_tsv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TSV_EXTENSION))
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}
