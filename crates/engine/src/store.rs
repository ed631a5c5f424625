//! Run persistence boundary and the in-memory implementation.
//!
//! The engine only ever talks to [`RunStore`]; a durable implementation is
//! supplied by the embedding application. [`InMemoryRunStore`] backs tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use qualiforge_core::RunId;
use qualiforge_qualification::{QualificationResult, Run, RunStatus};

use crate::job::QualificationJob;

#[derive(Debug, Clone, Error)]
pub enum RunStoreError {
    #[error("run not found: {0}")]
    NotFound(RunId),
    #[error("run already exists: {0}")]
    AlreadyExists(RunId),
    #[error("illegal run transition {from:?} -> {to:?} for {run_id}")]
    IllegalTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Progress snapshot returned by [`RunStore::increment_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub completed: u32,
    pub total_prospects: u32,
}

impl RunProgress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total_prospects
    }
}

/// Run counts by status, for dashboards and health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Persistence operations the engine needs.
///
/// Writers race: the queue completes runs, the sweep fails stalled ones, and
/// callers abort. All status changes therefore go through the compare-and-set
/// [`transition_status`](RunStore::transition_status), and results are
/// append-once per `(run, domain)` so crash replay never double-counts.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run. Fails if the id already exists.
    async fn create_run(&self, run: Run) -> Result<(), RunStoreError>;

    /// Fetch a run by id.
    async fn get_run(&self, run_id: RunId) -> Result<Run, RunStoreError>;

    /// Compare-and-set the run status.
    ///
    /// Returns `Ok(true)` when this caller moved the run from `expected` to
    /// `next`, `Ok(false)` when the run was no longer in `expected` (another
    /// writer won the race). A matching `expected` with an illegal edge is an
    /// error. `reason` is stored as the failure reason when provided.
    async fn transition_status(
        &self,
        run_id: RunId,
        expected: RunStatus,
        next: RunStatus,
        reason: Option<String>,
    ) -> Result<bool, RunStoreError>;

    /// Atomically count one resolved domain and refresh `last_progress_at`.
    async fn increment_progress(&self, run_id: RunId) -> Result<RunProgress, RunStoreError>;

    /// Insert or replace a job, keyed by `(run_id, domain)`.
    async fn upsert_job(&self, job: QualificationJob) -> Result<(), RunStoreError>;

    /// Fetch a job by its `(run_id, domain)` key.
    async fn get_job(
        &self,
        run_id: RunId,
        domain: &str,
    ) -> Result<Option<QualificationJob>, RunStoreError>;

    /// Record a result exactly once per `(run, domain)`.
    ///
    /// Returns `true` when the result was appended, `false` when one already
    /// existed. Callers must only count progress after a `true`.
    async fn record_result(&self, result: QualificationResult) -> Result<bool, RunStoreError>;

    /// All recorded results for a run, ordered by domain.
    async fn results_for_run(
        &self,
        run_id: RunId,
    ) -> Result<Vec<QualificationResult>, RunStoreError>;

    /// Running runs whose `last_progress_at` is older than `cutoff`.
    async fn stale_running_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Run>, RunStoreError>;

    /// Aggregate run counts by status.
    async fn run_counts(&self) -> Result<RunStats, RunStoreError>;
}

/// In-memory [`RunStore`] over a single `RwLock`.
///
/// Lock scopes are short and never held across an await point.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, Run>,
    jobs: HashMap<(RunId, String), QualificationJob>,
    results: HashMap<(RunId, String), QualificationResult>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common shared-handle construction.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: Run) -> Result<(), RunStoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.runs.contains_key(&run.id) {
            return Err(RunStoreError::AlreadyExists(run.id));
        }
        inner.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        let inner = self.inner.read().unwrap();
        inner
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(RunStoreError::NotFound(run_id))
    }

    async fn transition_status(
        &self,
        run_id: RunId,
        expected: RunStatus,
        next: RunStatus,
        reason: Option<String>,
    ) -> Result<bool, RunStoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(RunStoreError::NotFound(run_id))?;
        if run.status != expected {
            return Ok(false);
        }
        run.transition_to(next)
            .map_err(|_| RunStoreError::IllegalTransition {
                run_id,
                from: expected,
                to: next,
            })?;
        if let Some(reason) = reason {
            run.set_failure_reason(reason);
        }
        Ok(true)
    }

    async fn increment_progress(&self, run_id: RunId) -> Result<RunProgress, RunStoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(RunStoreError::NotFound(run_id))?;
        run.record_progress()
            .map_err(|e| RunStoreError::Storage(e.to_string()))?;
        Ok(RunProgress {
            completed: run.completed,
            total_prospects: run.total_prospects,
        })
    }

    async fn upsert_job(&self, job: QualificationJob) -> Result<(), RunStoreError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.runs.contains_key(&job.run_id) {
            return Err(RunStoreError::NotFound(job.run_id));
        }
        inner.jobs.insert((job.run_id, job.domain.clone()), job);
        Ok(())
    }

    async fn get_job(
        &self,
        run_id: RunId,
        domain: &str,
    ) -> Result<Option<QualificationJob>, RunStoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.jobs.get(&(run_id, domain.to_string())).cloned())
    }

    async fn record_result(&self, result: QualificationResult) -> Result<bool, RunStoreError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.runs.contains_key(&result.run_id) {
            return Err(RunStoreError::NotFound(result.run_id));
        }
        let key = (result.run_id, result.domain.clone());
        if inner.results.contains_key(&key) {
            return Ok(false);
        }
        inner.results.insert(key, result);
        Ok(true)
    }

    async fn results_for_run(
        &self,
        run_id: RunId,
    ) -> Result<Vec<QualificationResult>, RunStoreError> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<QualificationResult> = inner
            .results
            .iter()
            .filter(|((id, _), _)| *id == run_id)
            .map(|(_, result)| result.clone())
            .collect();
        results.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(results)
    }

    async fn stale_running_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Run>, RunStoreError> {
        let inner = self.inner.read().unwrap();
        let mut stale: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Running && run.last_progress_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|run| run.created_at);
        Ok(stale)
    }

    async fn run_counts(&self) -> Result<RunStats, RunStoreError> {
        let inner = self.inner.read().unwrap();
        let mut stats = RunStats::default();
        for run in inner.runs.values() {
            match run.status {
                RunStatus::Pending => stats.pending += 1,
                RunStatus::Running => stats.running += 1,
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualiforge_core::{IcpId, UserId};
    use qualiforge_qualification::ScoredProspect;

    fn test_run(total: u32) -> Run {
        Run::new(IcpId::new(), UserId::new(), total)
    }

    fn scored(score: f64) -> ScoredProspect {
        ScoredProspect {
            score,
            matched_criteria: vec!["B2B SaaS".to_string()],
            gaps: vec![],
            company_data: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let store = InMemoryRunStore::new();
        let run = test_run(3);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        let fetched = store.get_run(run_id).await.unwrap();
        assert_eq!(fetched.id, run_id);
        assert_eq!(fetched.status, RunStatus::Pending);
        assert_eq!(fetched.total_prospects, 3);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryRunStore::new();
        let run = test_run(1);
        store.create_run(run.clone()).await.unwrap();

        match store.create_run(run).await {
            Err(RunStoreError::AlreadyExists(_)) => {}
            other => panic!("Expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let store = InMemoryRunStore::new();
        match store.get_run(RunId::new()).await {
            Err(RunStoreError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transition_cas_admits_exactly_one_writer() {
        let store = InMemoryRunStore::new();
        let run = test_run(1);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        let moved = store
            .transition_status(run_id, RunStatus::Pending, RunStatus::Running, None)
            .await
            .unwrap();
        assert!(moved);

        // Simulates the queue and the sweep both trying to settle the run.
        let first = store
            .transition_status(run_id, RunStatus::Running, RunStatus::Completed, None)
            .await
            .unwrap();
        let second = store
            .transition_status(
                run_id,
                RunStatus::Running,
                RunStatus::Failed,
                Some("no progress for 10m".to_string()),
            )
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.failure_reason.is_none());
    }

    #[tokio::test]
    async fn transition_rejects_illegal_edge() {
        let store = InMemoryRunStore::new();
        let run = test_run(1);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        match store
            .transition_status(run_id, RunStatus::Pending, RunStatus::Completed, None)
            .await
        {
            Err(RunStoreError::IllegalTransition { from, to, .. }) => {
                assert_eq!(from, RunStatus::Pending);
                assert_eq!(to, RunStatus::Completed);
            }
            other => panic!("Expected IllegalTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_reason_is_recorded() {
        let store = InMemoryRunStore::new();
        let run = test_run(1);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        store
            .transition_status(
                run_id,
                RunStatus::Pending,
                RunStatus::Failed,
                Some("setup failed: scorer unavailable".to_string()),
            )
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.failure_reason.as_deref(),
            Some("setup failed: scorer unavailable")
        );
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn increment_progress_counts_and_reports() {
        let store = InMemoryRunStore::new();
        let run = test_run(2);
        let run_id = run.id;
        let before = run.last_progress_at;
        store.create_run(run).await.unwrap();

        let progress = store.increment_progress(run_id).await.unwrap();
        assert_eq!(progress.completed, 1);
        assert!(!progress.is_complete());

        let progress = store.increment_progress(run_id).await.unwrap();
        assert_eq!(progress.completed, 2);
        assert!(progress.is_complete());

        let run = store.get_run(run_id).await.unwrap();
        assert!(run.last_progress_at >= before);

        match store.increment_progress(run_id).await {
            Err(RunStoreError::Storage(_)) => {}
            other => panic!("Expected Storage error past total, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upsert_job_overwrites_by_key() {
        let store = InMemoryRunStore::new();
        let run = test_run(1);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        let mut job = QualificationJob::new(run_id, "acme.com");
        store.upsert_job(job.clone()).await.unwrap();

        job.mark_running();
        store.upsert_job(job.clone()).await.unwrap();

        let stored = store.get_job(run_id, "acme.com").await.unwrap().unwrap();
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.state, crate::job::JobState::Running);

        assert!(store.get_job(run_id, "other.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_for_unknown_run_is_rejected() {
        let store = InMemoryRunStore::new();
        let job = QualificationJob::new(RunId::new(), "acme.com");
        match store.upsert_job(job).await {
            Err(RunStoreError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn results_append_once_per_domain() {
        let store = InMemoryRunStore::new();
        let run = test_run(2);
        let run_id = run.id;
        store.create_run(run).await.unwrap();

        let first = QualificationResult::from_scored(run_id, "acme.com", scored(82.0));
        let replay = QualificationResult::from_scored(run_id, "acme.com", scored(40.0));

        assert!(store.record_result(first).await.unwrap());
        assert!(!store.record_result(replay).await.unwrap());

        let results = store.results_for_run(run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        // The replay did not overwrite the original.
        assert_eq!(results[0].score, 82.0);
    }

    #[tokio::test]
    async fn results_are_scoped_to_their_run() {
        let store = InMemoryRunStore::new();
        let run_a = test_run(1);
        let run_b = test_run(1);
        let (id_a, id_b) = (run_a.id, run_b.id);
        store.create_run(run_a).await.unwrap();
        store.create_run(run_b).await.unwrap();

        store
            .record_result(QualificationResult::from_scored(id_a, "acme.com", scored(70.0)))
            .await
            .unwrap();
        store
            .record_result(QualificationResult::failed(id_b, "dead.example", "unreachable"))
            .await
            .unwrap();

        let results_a = store.results_for_run(id_a).await.unwrap();
        assert_eq!(results_a.len(), 1);
        assert!(results_a[0].is_success());

        let results_b = store.results_for_run(id_b).await.unwrap();
        assert_eq!(results_b.len(), 1);
        assert!(!results_b[0].is_success());
    }

    #[tokio::test]
    async fn stale_scan_honors_status_and_cutoff() {
        let store = InMemoryRunStore::new();

        let mut stalled = test_run(4);
        stalled.last_progress_at = Utc::now() - chrono::Duration::minutes(6);
        let stalled_id = stalled.id;
        store.create_run(stalled).await.unwrap();
        store
            .transition_status(stalled_id, RunStatus::Pending, RunStatus::Running, None)
            .await
            .unwrap();

        let mut fresh = test_run(4);
        fresh.last_progress_at = Utc::now() - chrono::Duration::minutes(4);
        let fresh_id = fresh.id;
        store.create_run(fresh).await.unwrap();
        store
            .transition_status(fresh_id, RunStatus::Pending, RunStatus::Running, None)
            .await
            .unwrap();

        // Old but still pending, so not a sweep candidate.
        let mut pending = test_run(4);
        pending.last_progress_at = Utc::now() - chrono::Duration::minutes(30);
        store.create_run(pending).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let stale = store.stale_running_runs(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, stalled_id);
    }

    #[tokio::test]
    async fn run_counts_aggregate_by_status() {
        let store = InMemoryRunStore::new();

        let pending = test_run(1);
        store.create_run(pending).await.unwrap();

        let running = test_run(1);
        let running_id = running.id;
        store.create_run(running).await.unwrap();
        store
            .transition_status(running_id, RunStatus::Pending, RunStatus::Running, None)
            .await
            .unwrap();

        let failed = test_run(1);
        let failed_id = failed.id;
        store.create_run(failed).await.unwrap();
        store
            .transition_status(
                failed_id,
                RunStatus::Pending,
                RunStatus::Failed,
                Some("aborted".to_string()),
            )
            .await
            .unwrap();

        let stats = store.run_counts().await.unwrap();
        assert_eq!(
            stats,
            RunStats {
                pending: 1,
                running: 1,
                completed: 0,
                failed: 1,
            }
        );
    }
}
