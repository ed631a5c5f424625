//! Scoring jobs and the retry policy applied to transient failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qualiforge_core::RunId;

/// Lifecycle of one scoring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// A worker is scoring the domain.
    Running,
    /// Result recorded.
    Succeeded,
    /// Permanently failed; a failure result was recorded.
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// One unit of scoring work, keyed by `(run_id, domain)`.
///
/// Re-enqueueing the same pair upserts this record instead of creating a
/// duplicate, which is what makes crash-replay safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationJob {
    pub run_id: RunId,
    pub domain: String,
    pub state: JobState,
    /// Scoring attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QualificationJob {
    pub fn new(run_id: RunId, domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            domain: domain.into(),
            state: JobState::Queued,
            attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Start (or restart) an attempt.
    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_succeeded(&mut self) {
        self.state = JobState::Succeeded;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.state = JobState::Failed;
        self.updated_at = Utc::now();
    }

    /// Hand the job back to the queue, keeping the attempt count.
    pub fn mark_queued(&mut self) {
        self.state = JobState::Queued;
        self.updated_at = Utc::now();
    }
}

/// Delay shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// Doubles per attempt, capped at `max_delay`.
    Exponential,
}

/// Retry schedule for transient scoring failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction of the delay used as a +/- spread, e.g. 0.1 for 10%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts ran.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    ///
    /// Jitter is deterministic, keyed on the attempt number, so tests and
    /// replayed schedules see identical delays.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as f64;
        let cap_ms = self.max_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let doublings = (attempt - 1).min(63);
                base_ms * 2_f64.powi(doublings as i32)
            }
        };
        let capped_ms = raw_ms.min(cap_ms);

        let spread = capped_ms * self.jitter;
        let jittered_ms = if spread > 0.0 {
            let phase = ((attempt as f64 * 13.0) % 100.0) / 100.0;
            capped_ms + spread * (phase - 0.5) * 2.0
        } else {
            capped_ms
        };
        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }
}
