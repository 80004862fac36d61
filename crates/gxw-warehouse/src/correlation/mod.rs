//! Gene-pair correlations derived from the fact table
//!
//! - [`stats`]: ranks, Spearman's rho, t-tail p-values, Benjamini-Hochberg
//! - [`job`]: per-study matrix load, computation and delete-and-replace

pub mod job;
pub mod stats;

pub use job::{
    compute_correlations, CorrelationFailure, CorrelationJob, CorrelationSettings,
    CorrelationSummary, ExpressionMatrix, GenePairCorrelation, StudyCorrelation, StudyTarget,
    DEFAULT_MIN_SAMPLES,
};
