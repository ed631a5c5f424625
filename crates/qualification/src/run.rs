//! Qualification run lifecycle.
//!
//! A run is one batch request: a set of prospect domains scored against one
//! ideal customer profile. Runs move through a small state machine
//! (pending -> running -> completed | failed) where terminal states have no
//! outgoing edges, so a run finishes exactly once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use qualiforge_core::{DomainError, IcpId, RunId, UserId};

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet accepted by the job queue
    Pending,
    /// Domains accepted, scoring in progress
    Running,
    /// Every domain processed
    Completed,
    /// Timed out, aborted, or failed during setup
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Legal state-machine edges. Terminal states have none.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

/// A batch qualification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run ID
    pub id: RunId,
    /// Profile the prospects are matched against
    pub icp_id: IcpId,
    /// Requesting user
    pub user_id: UserId,
    /// Current status
    pub status: RunStatus,
    /// Number of domains in the batch
    pub total_prospects: u32,
    /// Domains processed so far (succeeded or permanently failed)
    pub completed: u32,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Refreshed on every job resolution; the sweep reads this
    pub last_progress_at: DateTime<Utc>,
    /// Human-readable reason, set whenever status is Failed
    pub failure_reason: Option<String>,
}

impl Run {
    /// Create a new pending run.
    pub fn new(icp_id: IcpId, user_id: UserId, total_prospects: u32) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            icp_id,
            user_id,
            status: RunStatus::Pending,
            total_prospects,
            completed: 0,
            created_at: now,
            completed_at: None,
            last_progress_at: now,
            failure_reason: None,
        }
    }

    /// Apply a status transition, rejecting illegal edges.
    ///
    /// Callers that need compare-and-set semantics check the expected status
    /// first under their own lock; this only enforces the state machine.
    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "illegal run transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record one resolved domain (succeeded or permanently failed).
    ///
    /// Progress never exceeds `total_prospects`.
    pub fn record_progress(&mut self) -> Result<(), DomainError> {
        if self.completed >= self.total_prospects {
            return Err(DomainError::invariant(
                "completed would exceed total_prospects",
            ));
        }
        self.completed += 1;
        self.last_progress_at = Utc::now();
        Ok(())
    }

    /// Set the failure reason. Only meaningful alongside a Failed transition.
    pub fn set_failure_reason(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
    }

    /// Whether every domain in the batch has been processed.
    pub fn is_finished(&self) -> bool {
        self.completed == self.total_prospects
    }

    /// Invariant helper: a run is stale when it is Running but has made no
    /// progress for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == RunStatus::Running && now - self.last_progress_at > timeout
    }
}
