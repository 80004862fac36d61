//! GXW CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line interface for loading genomic expression studies into the
//! warehouse.
//!
//! # Overview
//!
//! - **Loading**: process every discovered study (`gxw run`)
//! - **Recovery**: continue an interrupted run (`gxw resume`) or undo one (`gxw rollback`)
//! - **Preflight**: check study files without a database (`gxw validate`)
//! - **Inspection**: per-run reports and warehouse status (`gxw report`, `gxw status`)
//! - **Analysis**: refresh gene-pair correlations from loaded facts (`gxw correlate`)

pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod source;

// Re-export commonly used types
pub use config::GxwConfig;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// GXW - Genomic Expression Warehouse loader
#[derive(Parser, Debug)]
#[command(name = "gxw")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        env = "GXW_CONFIG",
        default_value = config::DEFAULT_CONFIG_PATH,
        global = true
    )]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load every study under the input directory as a new run
    Run {
        /// Run identifier (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Continue a run that did not complete
    Resume {
        /// Run to resume
        #[arg(long)]
        run_id: String,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the facts, checkpoints and outcomes of one run
    Rollback {
        /// Run to roll back
        #[arg(long)]
        run_id: String,
    },

    /// Check study files without touching the database
    Validate {
        /// Input directory (overrides processing.input_directory)
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Gene whitelist (overrides processing.gene_filter_file)
        #[arg(short, long)]
        gene_filter: Option<PathBuf>,
    },

    /// Show what a run did
    Report {
        /// Run to report on
        #[arg(long)]
        run_id: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent runs and warehouse row counts
    Status {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Recompute gene-pair correlations of loaded studies
    Correlate {
        /// GSE accession to refresh (repeatable; all studies when omitted)
        #[arg(short, long = "study")]
        studies: Vec<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}
