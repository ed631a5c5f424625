//! Per-domain qualification outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qualiforge_core::RunId;

/// Firmographic data gathered while scoring a prospect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompanyData {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<u32>,
    pub location: Option<String>,
    pub technologies: Vec<String>,
}

/// Raw output of the scoring collaborator for one prospect domain.
///
/// The engine stamps run/domain/timestamp onto it to form a
/// [`QualificationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProspect {
    /// Fit score in 0.0..=100.0
    pub score: f64,
    /// Profile criteria the prospect satisfied
    pub matched_criteria: Vec<String>,
    /// Profile criteria the prospect missed
    pub gaps: Vec<String>,
    pub company_data: Option<CompanyData>,
}

/// Per-domain outcome attached to a run.
///
/// Recorded once when the job resolves and never mutated afterward. A failed
/// domain still gets a record (with `error` set) so the run's progress count
/// reaches the batch total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationResult {
    pub run_id: RunId,
    pub domain: String,
    pub score: f64,
    pub matched_criteria: Vec<String>,
    pub gaps: Vec<String>,
    pub company_data: Option<CompanyData>,
    /// Set when scoring failed permanently; `score` is 0.0 in that case
    pub error: Option<String>,
    pub scored_at: DateTime<Utc>,
}

impl QualificationResult {
    /// Build a successful result from the scorer's output.
    pub fn from_scored(run_id: RunId, domain: impl Into<String>, scored: ScoredProspect) -> Self {
        Self {
            run_id,
            domain: domain.into(),
            score: scored.score,
            matched_criteria: scored.matched_criteria,
            gaps: scored.gaps,
            company_data: scored.company_data,
            error: None,
            scored_at: Utc::now(),
        }
    }

    /// Build a failure record for a domain that could not be scored.
    pub fn failed(run_id: RunId, domain: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            domain: domain.into(),
            score: 0.0,
            matched_criteria: Vec::new(),
            gaps: Vec::new(),
            company_data: None,
            error: Some(error.into()),
            scored_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scored_result_carries_criteria_partition() {
        let scored = ScoredProspect {
            score: 72.5,
            matched_criteria: vec!["b2b".into(), "uses-crm".into()],
            gaps: vec!["50-500".into()],
            company_data: Some(CompanyData {
                name: Some("Acme".into()),
                industry: Some("software".into()),
                employee_count: Some(42),
                location: None,
                technologies: vec!["salesforce".into()],
            }),
        };

        let result = QualificationResult::from_scored(RunId::new(), "acme.example", scored);
        assert!(result.is_success());
        assert_eq!(result.score, 72.5);
        assert_eq!(result.matched_criteria.len(), 2);
        assert_eq!(result.gaps.len(), 1);
        assert!(result.company_data.is_some());
    }

    #[test]
    fn failure_record_zeroes_score_and_sets_error() {
        let result = QualificationResult::failed(RunId::new(), "dead.example", "domain unreachable");
        assert!(!result.is_success());
        assert_eq!(result.score, 0.0);
        assert!(result.matched_criteria.is_empty());
        assert_eq!(result.error.as_deref(), Some("domain unreachable"));
    }
}
