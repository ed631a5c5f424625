//! Run lifecycle management: creation, the stale-run sweep, and recovery.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use qualiforge_core::{RunId, UserId};
use qualiforge_qualification::{IdealCustomerProfile, Run, RunStatus};

use crate::config::EngineConfig;
use crate::queue::QualificationQueue;
use crate::scorer::DomainScorer;
use crate::store::{RunStats, RunStore, RunStoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid run request: {0}")]
    Validation(String),
    #[error("run setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Store(#[from] RunStoreError),
}

/// What a recovery pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub runs: Vec<RunId>,
}

/// Creates runs and watches over their liveness.
///
/// The sweep runs on its own task, started with [`start`](Self::start) and
/// stopped with [`stop`](Self::stop); both are idempotent. A running run that
/// has made no progress within the configured timeout is failed with a
/// human-readable reason, which also catches runs orphaned by a crash because
/// the sweep's first pass happens immediately on start.
pub struct RunManager<S, P> {
    store: Arc<S>,
    queue: Arc<QualificationQueue<S, P>>,
    config: EngineConfig,
    sweep_shutdown: Arc<Notify>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S, P> RunManager<S, P>
where
    S: RunStore + 'static,
    P: DomainScorer + 'static,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<QualificationQueue<S, P>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            sweep_shutdown: Arc::new(Notify::new()),
            sweep_task: Mutex::new(None),
        }
    }

    /// Create a run for `domains` scored against `icp` and queue all of it.
    ///
    /// Domains are trimmed, lowercased, and deduplicated before the run is
    /// sized, so `total_prospects` always matches the queued work. A setup
    /// failure after the run record exists marks the run failed rather than
    /// leaving it dangling.
    pub async fn create_run(
        &self,
        icp: IdealCustomerProfile,
        user_id: UserId,
        domains: Vec<String>,
    ) -> Result<RunId, EngineError> {
        let domains = normalize_domains(domains);
        if domains.is_empty() {
            return Err(EngineError::Validation(
                "a run needs at least one prospect domain".to_string(),
            ));
        }

        let run = Run::new(icp.id, user_id, domains.len() as u32);
        let run_id = run.id;
        self.store.create_run(run).await?;
        info!(
            run_id = %run_id,
            icp_id = %icp.id,
            prospects = domains.len(),
            "run created"
        );

        // Activate before queueing so a worker that resolves the final
        // domain always observes a running run.
        let activated = self
            .store
            .transition_status(run_id, RunStatus::Pending, RunStatus::Running, None)
            .await?;
        if !activated {
            return Err(EngineError::Setup(format!(
                "run {run_id} was settled before activation"
            )));
        }

        let accepted = match self.queue.enqueue(run_id, Arc::new(icp), &domains).await {
            Ok(accepted) => accepted,
            Err(store_error) => {
                self.fail_setup(run_id, format!("setup failed: {store_error}"))
                    .await;
                return Err(store_error.into());
            }
        };
        if accepted == 0 {
            self.fail_setup(run_id, "setup failed: queue accepted no domains".to_string())
                .await;
            return Err(EngineError::Setup("queue accepted no domains".to_string()));
        }
        Ok(run_id)
    }

    async fn fail_setup(&self, run_id: RunId, reason: String) {
        error!(run_id = %run_id, reason = %reason, "run setup failed");
        if let Err(store_error) = self
            .store
            .transition_status(run_id, RunStatus::Running, RunStatus::Failed, Some(reason))
            .await
        {
            warn!(run_id = %run_id, error = %store_error, "failed to mark run failed after setup error");
        }
        self.queue.discard_run(run_id).await;
    }

    /// Start the periodic sweep. Idempotent.
    pub fn start(&self) {
        let mut task = self.sweep_task.lock().unwrap();
        if task.is_some() {
            debug!("stale-run sweep already started");
            return;
        }
        *task = Some(tokio::spawn(sweep_loop(
            self.store.clone(),
            self.config.sweep_interval,
            self.config.run_timeout,
            self.sweep_shutdown.clone(),
        )));
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            timeout_secs = self.config.run_timeout.as_secs(),
            "stale-run sweep started"
        );
    }

    /// Stop the sweep and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let task = {
            let mut slot = self.sweep_task.lock().unwrap();
            slot.take()
        };
        let Some(task) = task else {
            debug!("stale-run sweep not running");
            return;
        };
        self.sweep_shutdown.notify_one();
        let _ = task.await;
    }

    /// Fail every running run with no progress since `timeout` ago.
    ///
    /// Safe to call repeatedly: a run is only recovered once, and runs that
    /// completed in the meantime are left alone.
    pub async fn recover_stuck_runs(
        &self,
        timeout: Duration,
    ) -> Result<RecoveryReport, RunStoreError> {
        recover_stuck(self.store.as_ref(), timeout).await
    }

    /// Abort a pending or running run, recording the caller's reason.
    ///
    /// Queued jobs are discarded; in-flight jobs run to resolution but can no
    /// longer complete the run. Returns `false` when the run was already
    /// settled.
    pub async fn abort_run(
        &self,
        run_id: RunId,
        reason: impl Into<String>,
    ) -> Result<bool, RunStoreError> {
        let reason = reason.into();
        let mut aborted = self
            .store
            .transition_status(
                run_id,
                RunStatus::Running,
                RunStatus::Failed,
                Some(reason.clone()),
            )
            .await?;
        if !aborted {
            aborted = self
                .store
                .transition_status(
                    run_id,
                    RunStatus::Pending,
                    RunStatus::Failed,
                    Some(reason.clone()),
                )
                .await?;
        }
        if aborted {
            let discarded = self.queue.discard_run(run_id).await;
            info!(run_id = %run_id, discarded, reason = %reason, "run aborted");
        }
        Ok(aborted)
    }

    /// Run counts by status.
    pub async fn stats(&self) -> Result<RunStats, RunStoreError> {
        self.store.run_counts().await
    }
}

async fn sweep_loop<S: RunStore>(
    store: Arc<S>,
    interval: Duration,
    timeout: Duration,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately, which doubles as startup
    // recovery for runs orphaned by a previous process.
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("stale-run sweep stopped");
                break;
            }
            _ = ticker.tick() => {
                match recover_stuck(store.as_ref(), timeout).await {
                    Ok(report) if report.recovered > 0 => {
                        info!(recovered = report.recovered, "sweep failed stalled runs");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(error = %error, "sweep scan failed"),
                }
            }
        }
    }
}

async fn recover_stuck<S: RunStore>(
    store: &S,
    timeout: Duration,
) -> Result<RecoveryReport, RunStoreError> {
    let window = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    let stale = store.stale_running_runs(cutoff).await?;
    if stale.is_empty() {
        return Ok(RecoveryReport::default());
    }

    let minutes = timeout.as_secs().div_ceil(60).max(1);
    let mut recovered = Vec::new();
    for run in stale {
        let reason = format!("no progress for {minutes}m");
        match store
            .transition_status(run.id, RunStatus::Running, RunStatus::Failed, Some(reason))
            .await
        {
            Ok(true) => {
                warn!(
                    run_id = %run.id,
                    last_progress_at = %run.last_progress_at,
                    completed = run.completed,
                    total = run.total_prospects,
                    "stalled run marked failed"
                );
                recovered.push(run.id);
            }
            Ok(false) => {
                // Settled by the queue or another sweep in the meantime.
            }
            Err(error) => {
                warn!(run_id = %run.id, error = %error, "failed to mark stalled run");
            }
        }
    }
    Ok(RecoveryReport {
        recovered: recovered.len(),
        runs: recovered,
    })
}

fn normalize_domains(domains: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for domain in domains {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() || !seen.insert(domain.clone()) {
            continue;
        }
        normalized.push(domain);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_lowercases_and_dedupes() {
        let domains = vec![
            "  Acme.COM ".to_string(),
            "acme.com".to_string(),
            "".to_string(),
            "   ".to_string(),
            "globex.io".to_string(),
        ];
        assert_eq!(
            normalize_domains(domains),
            vec!["acme.com".to_string(), "globex.io".to_string()]
        );
    }

    #[test]
    fn normalize_preserves_first_seen_order() {
        let domains = vec![
            "b.com".to_string(),
            "a.com".to_string(),
            "B.COM".to_string(),
        ];
        assert_eq!(
            normalize_domains(domains),
            vec!["b.com".to_string(), "a.com".to_string()]
        );
    }
}
