//! Job queue: pulls `(run, domain)` pairs through a bounded worker pool.
//!
//! The dispatcher takes a semaphore permit, pops the next pair in run
//! round-robin order, and spawns a worker. Workers score the domain, retry
//! transient failures on the configured backoff schedule, record the result,
//! and count progress. The pool is shared across all active runs so one large
//! run cannot starve the others.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qualiforge_core::RunId;
use qualiforge_qualification::{IdealCustomerProfile, QualificationResult, RunStatus};

use crate::config::EngineConfig;
use crate::job::{QualificationJob, RetryPolicy};
use crate::scorer::{DomainScorer, ScoreError};
use crate::store::{RunStore, RunStoreError};

/// Queue counters, for dashboards and drain checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pairs waiting for a worker.
    pub queued: usize,
    /// Workers currently scoring.
    pub running: usize,
    pub succeeded_total: u64,
    pub failed_total: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    succeeded_total: u64,
    failed_total: u64,
}

/// Per-run FIFO queues drained in round-robin order across runs.
#[derive(Debug, Default)]
struct RunQueues {
    /// Rotation order over runs that currently have queued domains.
    order: VecDeque<RunId>,
    by_run: HashMap<RunId, VecDeque<String>>,
    /// Domains known to the queue and not yet resolved, in-flight included.
    active: HashMap<RunId, HashSet<String>>,
    icps: HashMap<RunId, Arc<IdealCustomerProfile>>,
}

impl RunQueues {
    /// Queue a domain. Returns false when the pair is already queued or in
    /// flight.
    fn push(&mut self, run_id: RunId, domain: String) -> bool {
        if !self.active.entry(run_id).or_default().insert(domain.clone()) {
            return false;
        }
        let queue = self.by_run.entry(run_id).or_default();
        if queue.is_empty() {
            self.order.push_back(run_id);
        }
        queue.push_back(domain);
        true
    }

    /// One domain from the run at the front of the rotation, which then moves
    /// to the back.
    fn pop_next(&mut self) -> Option<(RunId, String)> {
        loop {
            let run_id = self.order.pop_front()?;
            let Some(queue) = self.by_run.get_mut(&run_id) else {
                continue;
            };
            let Some(domain) = queue.pop_front() else {
                self.by_run.remove(&run_id);
                continue;
            };
            if queue.is_empty() {
                self.by_run.remove(&run_id);
            } else {
                self.order.push_back(run_id);
            }
            return Some((run_id, domain));
        }
    }

    /// Forget a resolved pair.
    fn resolve(&mut self, run_id: RunId, domain: &str) {
        if let Some(domains) = self.active.get_mut(&run_id) {
            domains.remove(domain);
            if domains.is_empty() {
                self.active.remove(&run_id);
            }
        }
    }

    /// Drop all queued work for a run. In-flight domains stay active so their
    /// resolution is still tracked. Returns the discarded domains.
    fn discard(&mut self, run_id: RunId) -> Vec<String> {
        self.icps.remove(&run_id);
        self.order.retain(|id| *id != run_id);
        let Some(queue) = self.by_run.remove(&run_id) else {
            return Vec::new();
        };
        let domains = Vec::from(queue);
        if let Some(active) = self.active.get_mut(&run_id) {
            for domain in &domains {
                active.remove(domain);
            }
            if active.is_empty() {
                self.active.remove(&run_id);
            }
        }
        domains
    }

    fn queued_len(&self) -> usize {
        self.by_run.values().map(VecDeque::len).sum()
    }

    fn has_pending(&self, run_id: RunId) -> bool {
        self.by_run.contains_key(&run_id) || self.active.contains_key(&run_id)
    }
}

struct QueueInner<S, P> {
    store: Arc<S>,
    scorer: Arc<P>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    queues: Mutex<RunQueues>,
    counters: Mutex<QueueCounters>,
    work_available: Notify,
}

/// Shared job queue for qualification runs.
///
/// Spawned once per engine; [`enqueue`](Self::enqueue) is safe to call from
/// any task. Dropping the queue without [`stop`](Self::stop) leaves workers
/// running until their current job resolves.
pub struct QualificationQueue<S, P> {
    inner: Arc<QueueInner<S, P>>,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    max_concurrent: usize,
}

impl<S, P> QualificationQueue<S, P>
where
    S: RunStore + 'static,
    P: DomainScorer + 'static,
{
    /// Start the dispatcher and worker pool.
    pub fn spawn(store: Arc<S>, scorer: Arc<P>, config: &EngineConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let inner = Arc::new(QueueInner {
            store,
            scorer,
            retry: config.retry.clone(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            queues: Mutex::new(RunQueues::default()),
            counters: Mutex::new(QueueCounters::default()),
            work_available: Notify::new(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch_loop(inner.clone(), shutdown_rx));
        info!(max_concurrent, "qualification queue started");
        Self {
            inner,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
            max_concurrent,
        }
    }

    /// Queue domains for a run. Returns the number actually accepted.
    ///
    /// Blank and repeated domains are dropped, pairs already queued or in
    /// flight are dropped, and pairs whose job is already terminal in the
    /// store are dropped. That makes re-enqueueing after a crash safe: only
    /// unresolved work is picked up again.
    pub async fn enqueue(
        &self,
        run_id: RunId,
        icp: Arc<IdealCustomerProfile>,
        domains: &[String],
    ) -> Result<usize, RunStoreError> {
        if *self.shutdown.borrow() {
            warn!(run_id = %run_id, "queue is stopped, rejecting enqueue");
            return Ok(0);
        }

        {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.icps.insert(run_id, icp);
        }

        let mut accepted = 0usize;
        let mut seen: HashSet<&str> = HashSet::new();
        for domain in domains {
            let domain = domain.trim();
            if domain.is_empty() || !seen.insert(domain) {
                continue;
            }
            let job = match self.inner.store.get_job(run_id, domain).await? {
                Some(existing) if existing.state.is_terminal() => {
                    debug!(run_id = %run_id, domain = %domain, "domain already resolved, skipping");
                    continue;
                }
                Some(mut existing) => {
                    existing.mark_queued();
                    existing
                }
                None => QualificationJob::new(run_id, domain),
            };
            let queued = {
                let mut queues = self.inner.queues.lock().unwrap();
                queues.push(run_id, domain.to_string())
            };
            if !queued {
                continue;
            }
            self.inner.store.upsert_job(job).await?;
            accepted += 1;
            self.inner.work_available.notify_one();
        }

        if accepted == 0 {
            let mut queues = self.inner.queues.lock().unwrap();
            if !queues.has_pending(run_id) {
                queues.icps.remove(&run_id);
            }
        } else {
            debug!(run_id = %run_id, accepted, "domains enqueued");
        }
        Ok(accepted)
    }

    /// Drop all queued (not yet started) jobs for a run and mark them failed.
    /// In-flight jobs run to resolution. Returns how many were discarded.
    pub async fn discard_run(&self, run_id: RunId) -> usize {
        let domains = {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.discard(run_id)
        };
        for domain in &domains {
            match self.inner.store.get_job(run_id, domain).await {
                Ok(Some(mut job)) => {
                    job.mark_failed();
                    if let Err(error) = self.inner.store.upsert_job(job).await {
                        warn!(run_id = %run_id, domain = %domain, error = %error, "failed to mark discarded job");
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(run_id = %run_id, domain = %domain, error = %error, "failed to load discarded job");
                }
            }
        }
        if !domains.is_empty() {
            info!(run_id = %run_id, discarded = domains.len(), "queued jobs discarded");
        }
        domains.len()
    }

    pub fn stats(&self) -> QueueStats {
        let queued = {
            let queues = self.inner.queues.lock().unwrap();
            queues.queued_len()
        };
        let counters = self.inner.counters.lock().unwrap();
        QueueStats {
            queued,
            running: self
                .max_concurrent
                .saturating_sub(self.inner.semaphore.available_permits()),
            succeeded_total: counters.succeeded_total,
            failed_total: counters.failed_total,
        }
    }

    /// Stop intake, stop dispatching, and wait for in-flight jobs to resolve.
    ///
    /// Jobs sleeping in retry backoff are returned to the store as queued so
    /// a later enqueue picks them up. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let dispatcher = {
            let mut slot = self.dispatcher.lock().unwrap();
            slot.take()
        };
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }
        // Every worker holds a permit until its job resolves, so acquiring
        // the whole pool is the drain barrier.
        if let Ok(permits) = self
            .inner
            .semaphore
            .acquire_many(self.max_concurrent as u32)
            .await
        {
            drop(permits);
        }
        info!(stats = ?self.stats(), "qualification queue stopped");
    }
}

async fn dispatch_loop<S, P>(inner: Arc<QueueInner<S, P>>, mut shutdown: watch::Receiver<bool>)
where
    S: RunStore + 'static,
    P: DomainScorer + 'static,
{
    loop {
        // Take a permit before popping so a popped pair is never stranded
        // waiting for capacity.
        let permit = tokio::select! {
            permit = inner.semaphore.clone().acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let popped = {
            let mut queues = inner.queues.lock().unwrap();
            queues.pop_next()
        };
        let Some((run_id, domain)) = popped else {
            drop(permit);
            tokio::select! {
                _ = inner.work_available.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            continue;
        };

        let worker_inner = inner.clone();
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _permit = permit;
            worker_inner
                .execute_job(run_id, domain, worker_shutdown)
                .await;
        });
    }
    debug!("qualification queue dispatcher exited");
}

impl<S, P> QueueInner<S, P>
where
    S: RunStore,
    P: DomainScorer,
{
    async fn execute_job(
        &self,
        run_id: RunId,
        domain: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let icp = {
            let queues = self.queues.lock().unwrap();
            queues.icps.get(&run_id).cloned()
        };
        let Some(icp) = icp else {
            // The run was discarded between dispatch and execution.
            self.resolve_active(run_id, &domain);
            return;
        };

        let mut job = match self.store.get_job(run_id, &domain).await {
            Ok(Some(job)) => job,
            Ok(None) => QualificationJob::new(run_id, domain.as_str()),
            Err(error) => {
                warn!(run_id = %run_id, domain = %domain, error = %error, "failed to load job, starting fresh");
                QualificationJob::new(run_id, domain.as_str())
            }
        };

        loop {
            job.mark_running();
            if let Err(error) = self.store.upsert_job(job.clone()).await {
                warn!(run_id = %run_id, domain = %domain, error = %error, "failed to persist job state");
            }
            debug!(run_id = %run_id, domain = %domain, attempt = job.attempt, "scoring domain");

            match self.scorer.score(&domain, &icp).await {
                Ok(prospect) => {
                    let result =
                        QualificationResult::from_scored(run_id, domain.as_str(), prospect);
                    self.finish_job(&mut job, result, true).await;
                    return;
                }
                Err(error) if error.is_transient() && self.retry.should_retry(job.attempt) => {
                    let delay = self.retry.delay_for_attempt(job.attempt);
                    debug!(
                        run_id = %run_id,
                        domain = %domain,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                // Shutting down mid-backoff: hand the job
                                // back unresolved so a later enqueue retries
                                // it.
                                job.mark_queued();
                                if let Err(error) = self.store.upsert_job(job.clone()).await {
                                    warn!(run_id = %run_id, domain = %domain, error = %error, "failed to requeue job during shutdown");
                                }
                                self.resolve_active(run_id, &domain);
                                return;
                            }
                        }
                    }
                }
                Err(error) => {
                    let reason = match &error {
                        ScoreError::Transient(message) => {
                            format!("retries exhausted after {} attempts: {message}", job.attempt)
                        }
                        ScoreError::Permanent(message) => message.clone(),
                    };
                    warn!(run_id = %run_id, domain = %domain, attempt = job.attempt, error = %error, "scoring failed permanently");
                    let result = QualificationResult::failed(run_id, domain.as_str(), reason);
                    self.finish_job(&mut job, result, false).await;
                    return;
                }
            }
        }
    }

    async fn finish_job(
        &self,
        job: &mut QualificationJob,
        result: QualificationResult,
        succeeded: bool,
    ) {
        let run_id = job.run_id;
        let domain = job.domain.clone();

        if succeeded {
            job.mark_succeeded();
        } else {
            job.mark_failed();
        }

        let appended = match self.store.record_result(result).await {
            Ok(appended) => appended,
            Err(error) => {
                warn!(run_id = %run_id, domain = %domain, error = %error, "failed to record result");
                false
            }
        };

        if let Err(error) = self.store.upsert_job(job.clone()).await {
            warn!(run_id = %run_id, domain = %domain, error = %error, "failed to persist terminal job state");
        }

        {
            let mut counters = self.counters.lock().unwrap();
            if succeeded {
                counters.succeeded_total += 1;
            } else {
                counters.failed_total += 1;
            }
        }
        self.resolve_active(run_id, &domain);

        if !appended {
            // A previous attempt already recorded this pair, and progress was
            // counted then.
            return;
        }

        match self.store.increment_progress(run_id).await {
            Ok(progress) => {
                debug!(
                    run_id = %run_id,
                    domain = %domain,
                    completed = progress.completed,
                    total = progress.total_prospects,
                    "domain resolved"
                );
                if progress.is_complete() {
                    self.complete_run(run_id).await;
                }
            }
            Err(error) => {
                warn!(run_id = %run_id, domain = %domain, error = %error, "failed to record progress");
            }
        }
    }

    async fn complete_run(&self, run_id: RunId) {
        {
            let mut queues = self.queues.lock().unwrap();
            queues.icps.remove(&run_id);
        }
        match self
            .store
            .transition_status(run_id, RunStatus::Running, RunStatus::Completed, None)
            .await
        {
            Ok(true) => info!(run_id = %run_id, "run completed"),
            Ok(false) => debug!(run_id = %run_id, "run was settled by another writer"),
            Err(error) => warn!(run_id = %run_id, error = %error, "failed to mark run completed"),
        }
    }

    fn resolve_active(&self, run_id: RunId, domain: &str) {
        let mut queues = self.queues.lock().unwrap();
        queues.resolve(run_id, domain);
    }
}
