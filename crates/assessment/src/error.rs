//! Selection error taxonomy.

use thiserror::Error;

use qualiforge_core::QuestionId;

/// Result type used across the assessment layer.
pub type SelectionResult<T> = Result<T, SelectionError>;

/// Errors raised by question selection and session bookkeeping.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectionError {
    /// The request itself is malformed (bad totals, fractions not summing to
    /// 1.0, bad quotas). Synchronous and never retried.
    #[error("invalid selection request: {0}")]
    Configuration(String),

    /// The eligible pool cannot satisfy the request, even after shortfall
    /// redistribution. Surfaced to the caller, never silently truncated.
    #[error("insufficient question pool: requested {requested}, available {available}")]
    InsufficientPool { requested: usize, available: usize },

    /// An answer was recorded for a question this session never handed out.
    #[error("question {0} was not asked in this session")]
    UnknownQuestion(QuestionId),
}

impl SelectionError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
