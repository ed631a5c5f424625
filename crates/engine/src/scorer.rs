//! Scoring collaborator boundary.

use thiserror::Error;

use qualiforge_qualification::{IdealCustomerProfile, ScoredProspect};

/// Failure classification for one scoring attempt.
///
/// The split drives the queue's retry decision: transient failures go through
/// the backoff schedule, permanent ones are recorded as failed results
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    /// Worth retrying: timeouts, rate limits, dropped connections.
    #[error("transient scoring failure: {0}")]
    Transient(String),
    /// Retrying cannot help: malformed domain, rejected input.
    #[error("permanent scoring failure: {0}")]
    Permanent(String),
}

impl ScoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ScoreError::Transient(_))
    }
}

/// Scores one prospect domain against an ideal customer profile.
///
/// Implementations wrap the external scoring service and own its rate
/// limiting; the engine layers retry with backoff on top.
#[async_trait::async_trait]
pub trait DomainScorer: Send + Sync {
    async fn score(
        &self,
        domain: &str,
        icp: &IdealCustomerProfile,
    ) -> Result<ScoredProspect, ScoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ScoreError::transient("rate limited").is_transient());
        assert!(!ScoreError::permanent("bad domain").is_transient());
    }
}
