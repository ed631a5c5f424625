//! Engine facade: one handle owning the queue and run manager wiring.

use std::sync::Arc;
use std::time::Duration;

use qualiforge_core::{RunId, UserId};
use qualiforge_qualification::{IdealCustomerProfile, QualificationResult, Run};

use crate::config::EngineConfig;
use crate::manager::{EngineError, RecoveryReport, RunManager};
use crate::queue::{QualificationQueue, QueueStats};
use crate::scorer::DomainScorer;
use crate::store::{RunStats, RunStore, RunStoreError};

/// The qualification engine.
///
/// Constructed once at startup and passed around by handle; there is no
/// ambient global instance. [`new`](Self::new) spawns the worker pool
/// immediately, [`start`](Self::start) additionally arms the stale-run sweep.
pub struct QualificationEngine<S, P> {
    store: Arc<S>,
    queue: Arc<QualificationQueue<S, P>>,
    manager: RunManager<S, P>,
}

impl<S, P> QualificationEngine<S, P>
where
    S: RunStore + 'static,
    P: DomainScorer + 'static,
{
    pub fn new(store: Arc<S>, scorer: Arc<P>, config: EngineConfig) -> Self {
        let queue = Arc::new(QualificationQueue::spawn(
            store.clone(),
            scorer,
            &config,
        ));
        let manager = RunManager::new(store.clone(), queue.clone(), config);
        Self {
            store,
            queue,
            manager,
        }
    }

    /// Start the stale-run sweep, which also recovers runs orphaned by a
    /// previous process. Idempotent.
    pub fn start(&self) {
        self.manager.start();
    }

    /// Stop the stale-run sweep. Worker pool keeps running. Idempotent.
    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    /// Graceful shutdown: stop intake, drain in-flight jobs, stop the sweep.
    pub async fn shutdown(&self) {
        self.queue.stop().await;
        self.manager.stop().await;
    }

    /// Create and activate a qualification run. See
    /// [`RunManager::create_run`].
    pub async fn create_run(
        &self,
        icp: IdealCustomerProfile,
        user_id: UserId,
        domains: Vec<String>,
    ) -> Result<RunId, EngineError> {
        self.manager.create_run(icp, user_id, domains).await
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        self.store.get_run(run_id).await
    }

    pub async fn results_for_run(
        &self,
        run_id: RunId,
    ) -> Result<Vec<QualificationResult>, RunStoreError> {
        self.store.results_for_run(run_id).await
    }

    /// Abort a run, recording `reason`. See [`RunManager::abort_run`].
    pub async fn abort_run(
        &self,
        run_id: RunId,
        reason: impl Into<String>,
    ) -> Result<bool, RunStoreError> {
        self.manager.abort_run(run_id, reason).await
    }

    /// Fail runs with no progress since `timeout` ago, outside the sweep
    /// cadence.
    pub async fn recover_stuck_runs(
        &self,
        timeout: Duration,
    ) -> Result<RecoveryReport, RunStoreError> {
        self.manager.recover_stuck_runs(timeout).await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn run_stats(&self) -> Result<RunStats, RunStoreError> {
        self.manager.stats().await
    }
}
