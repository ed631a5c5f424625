//! Concurrent qualification engine: scores prospect domains against ideal
//! customer profiles through a bounded worker pool.
//!
//! ## Design
//!
//! - One shared worker pool, round-robin across runs so no run starves
//! - Transient scoring failures retry with exponential backoff and jitter
//! - All status changes go through a compare-and-set store operation
//! - Results are append-once per `(run, domain)`, so crash replay is safe
//! - A periodic sweep fails runs that stop making progress
//!
//! ## Components
//!
//! - [`QualificationEngine`]: facade wiring the pieces together
//! - [`QualificationQueue`]: dispatcher plus worker pool
//! - [`RunManager`]: run creation, sweep, recovery, abort
//! - [`RunStore`]: persistence boundary with an in-memory implementation
//! - [`DomainScorer`]: boundary to the external scoring service

pub mod config;
pub mod context;
pub mod job;
pub mod manager;
pub mod queue;
pub mod scorer;
pub mod store;


pub use config::EngineConfig;
pub use context::QualificationEngine;
pub use job::{BackoffStrategy, JobState, QualificationJob, RetryPolicy};
pub use manager::{EngineError, RecoveryReport, RunManager};
pub use queue::{QualificationQueue, QueueStats};
pub use scorer::{DomainScorer, ScoreError};
pub use store::{InMemoryRunStore, RunProgress, RunStats, RunStore, RunStoreError};
