//! The resilient batch-load engine
//!
//! Leaf first:
//!
//! - [`tables`]: per-table key and column catalogue
//! - [`identity`]: natural key -> surrogate key resolution and assignment
//! - [`checkpoint`]: durable per-batch commit records
//! - [`retry`]: exponential backoff around transient failures
//! - [`committer`]: batches, dedup, and the batch+checkpoint atomic unit
//! - [`orchestrator`]: per-study state machine and bounded study concurrency

pub mod checkpoint;
pub mod committer;
pub mod identity;
pub mod orchestrator;
pub mod retry;
pub mod tables;
pub mod types;

pub use checkpoint::{CheckpointStore, CheckpointSummary, TableScope};
pub use committer::{BatchCommitter, BatchContext, CommitHook, NoopHook};
pub use identity::{Assignment, IdentityResolver};
pub use orchestrator::{Orchestrator, StaticSource, StudySource, StudyStart};
pub use retry::{with_retry, Backoff, RetryPolicy};
pub use types::{
    BatchResult, FailurePoint, LoadSettings, RunSummary, StudyReport, StudyState, TableLoad,
};
