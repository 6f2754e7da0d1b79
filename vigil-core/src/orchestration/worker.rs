//! Worker pool driving the per-job state machine.
//!
//! Each worker polls the dispatch queue, claims the referenced job through
//! the store's conditional update, invokes the scan engine under a
//! worker-enforced timeout, and publishes results atomically. Redelivered
//! messages for jobs that already finished are acknowledged without any
//! further writes; that conditional claim is the idempotency guard that
//! makes at-least-once delivery safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::ScanJob;
use crate::engine::{EngineFailure, ScanEngine};
use crate::error::Result;
use crate::persistence::{ClaimOutcome, JobStore};

use super::config::OrchestratorConfig;
use super::queue::{Delivery, DispatchQueue, RetryDisposition};

const MAX_RETRIES_MESSAGE: &str = "max retries exceeded";

/// A single queue consumer. Holds its own handles for the lifetime of the
/// poll loop; nothing here is shared mutable state.
pub struct Worker {
    pub id: String,
    queue: Arc<dyn DispatchQueue>,
    jobs: Arc<dyn JobStore>,
    engine: Arc<dyn ScanEngine>,
    config: OrchestratorConfig,
}

impl Worker {
    pub fn new(
        id: String,
        queue: Arc<dyn DispatchQueue>,
        jobs: Arc<dyn JobStore>,
        engine: Arc<dyn ScanEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            id,
            queue,
            jobs,
            engine,
            config,
        }
    }

    async fn run(self, shutdown: CancellationToken) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown.is_cancelled() {
                info!(worker = %self.id, "worker shutting down");
                break;
            }

            match self.queue.receive(&self.id).await {
                Ok(Some(delivery)) => {
                    if let Err(err) = self.process(delivery).await {
                        error!(worker = %self.id, error = %err, "delivery processing failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(err) => {
                    error!(worker = %self.id, error = %err, "queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Drive one delivery through the job state machine.
    pub async fn process(&self, delivery: Delivery) -> Result<()> {
        let grace = chrono::Duration::seconds(self.config.reclaim_grace_secs);

        let job = match self.jobs.claim(delivery.job_id, grace).await? {
            ClaimOutcome::Claimed(job) => {
                debug!(worker = %self.id, job = %job.id, "claimed job");
                job
            }
            ClaimOutcome::Reclaimed(job) => {
                warn!(worker = %self.id, job = %job.id, "reclaimed stalled job");
                job
            }
            ClaimOutcome::AlreadyTerminal(status) => {
                // Expected under at-least-once delivery; nothing to do.
                debug!(
                    worker = %self.id,
                    job = %delivery.job_id,
                    status = %status,
                    "redelivery for finished job, acknowledging"
                );
                self.queue.ack(&delivery).await?;
                return Ok(());
            }
            ClaimOutcome::Contended => {
                // Another worker holds a live claim. Do not ack: if that
                // worker dies, this message is the only path back to the job.
                debug!(worker = %self.id, job = %delivery.job_id, "claim contended, releasing");
                let disposition = self
                    .queue
                    .retry(&delivery, Some("claim contended".to_string()))
                    .await?;
                if disposition == RetryDisposition::DeadLettered {
                    self.quarantine(delivery.job_id, "claim contended").await?;
                }
                return Ok(());
            }
            ClaimOutcome::NotFound => {
                // Submission writes the row before enqueueing, so this is a
                // deleted job; drop the message.
                warn!(worker = %self.id, job = %delivery.job_id, "message for unknown job");
                self.queue.ack(&delivery).await?;
                return Ok(());
            }
        };

        self.scan_claimed(&delivery, &job).await
    }

    async fn scan_claimed(&self, delivery: &Delivery, job: &ScanJob) -> Result<()> {
        let scan_timeout = Duration::from_secs(self.config.scan_timeout_secs);
        info!(
            worker = %self.id,
            job = %job.id,
            scan_type = %job.scan_type,
            target = %job.target,
            attempt = delivery.attempt,
            "starting scan"
        );

        let outcome =
            tokio::time::timeout(scan_timeout, self.engine.scan(job.scan_type, &job.target)).await;

        let failure = match outcome {
            Ok(Ok(report)) => {
                return self.publish(delivery, job, report.findings).await;
            }
            Ok(Err(failure)) => failure,
            Err(_) => EngineFailure::Transient(format!(
                "scan timed out after {}s",
                self.config.scan_timeout_secs
            )),
        };

        match failure {
            EngineFailure::Permanent(message) => {
                warn!(worker = %self.id, job = %job.id, error = %message, "scan failed permanently");
                self.jobs.mark_failed(job.id, &message).await?;
                self.queue.ack(delivery).await?;
            }
            EngineFailure::Transient(message) => {
                warn!(
                    worker = %self.id,
                    job = %job.id,
                    attempt = delivery.attempt,
                    error = %message,
                    "scan failed transiently"
                );
                self.release_and_retry(delivery, job.id, message).await?;
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        delivery: &Delivery,
        job: &ScanJob,
        findings: Vec<crate::domain::Finding>,
    ) -> Result<()> {
        match self.jobs.publish_report(job.id, &findings).await {
            Ok(true) => {
                info!(
                    worker = %self.id,
                    job = %job.id,
                    findings = findings.len(),
                    "scan completed"
                );
                self.queue.ack(delivery).await?;
            }
            Ok(false) => {
                // Our claim was reclaimed while scanning; the new owner's
                // delivery governs the job now.
                warn!(worker = %self.id, job = %job.id, "claim lost before publication");
                self.queue.ack(delivery).await?;
            }
            Err(err) => {
                error!(worker = %self.id, job = %job.id, error = %err, "result write failed");
                self.release_and_retry(delivery, job.id, format!("result write failed: {err}"))
                    .await?;
            }
        }
        Ok(())
    }

    /// Transient-failure path: abandon the claim so the next redelivery
    /// can reclaim immediately, then release the message for retry.
    async fn release_and_retry(
        &self,
        delivery: &Delivery,
        job_id: uuid::Uuid,
        message: String,
    ) -> Result<()> {
        let grace = chrono::Duration::seconds(self.config.reclaim_grace_secs);
        self.jobs.release_claim(job_id, grace).await?;

        let disposition = self.queue.retry(delivery, Some(message.clone())).await?;
        if disposition == RetryDisposition::DeadLettered {
            self.quarantine(job_id, &message).await?;
        }
        Ok(())
    }

    /// Final-attempt reconciliation: a dead-lettered message must never
    /// leave its job stuck in `queued` or `scanning`.
    async fn quarantine(&self, job_id: uuid::Uuid, last_error: &str) -> Result<()> {
        let message = format!("{MAX_RETRIES_MESSAGE}; last error: {last_error}");
        if self.jobs.mark_failed(job_id, &message).await? {
            warn!(worker = %self.id, job = %job_id, "job quarantined after retry exhaustion");
        }
        Ok(())
    }
}

/// Spawns and supervises the worker tasks plus a housekeeping loop.
pub struct WorkerPool {
    config: OrchestratorConfig,
    queue: Arc<dyn DispatchQueue>,
    jobs: Arc<dyn JobStore>,
    engine: Arc<dyn ScanEngine>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<dyn DispatchQueue>,
        jobs: Arc<dyn JobStore>,
        engine: Arc<dyn ScanEngine>,
    ) -> Self {
        Self {
            config,
            queue,
            jobs,
            engine,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) {
        let worker_group = format!("scan-{}", std::process::id());
        let mut handles = self.handles.lock().await;

        for i in 0..self.config.workers {
            let worker = Worker::new(
                format!("{worker_group}-w{i}"),
                Arc::clone(&self.queue),
                Arc::clone(&self.jobs),
                Arc::clone(&self.engine),
                self.config,
            );
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(worker.run(shutdown)));
        }

        handles.push(self.spawn_housekeeper());
        info!(workers = self.config.workers, "worker pool started");
    }

    fn spawn_housekeeper(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let jobs = Arc::clone(&self.jobs);
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_millis(self.config.housekeeper_interval_ms);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                match queue.reclaim_expired().await {
                    Ok(0) => {}
                    Ok(touched) => info!(touched, "housekeeper reclaimed expired leases"),
                    Err(err) => error!(error = %err, "lease reclaim sweep failed"),
                }

                if let Err(err) = reconcile_dead_letters(queue.as_ref(), jobs.as_ref()).await {
                    error!(error = %err, "dead-letter reconciliation failed");
                }
            }
        })
    }

    /// Cancel all workers and wait for them to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

/// Sweep backstop for the invariant that every dead-lettered message
/// corresponds to a failed job, even if the final worker crashed between
/// dead-lettering and reconciling.
pub async fn reconcile_dead_letters(
    queue: &dyn DispatchQueue,
    jobs: &dyn JobStore,
) -> Result<usize> {
    let orphaned = queue.unreconciled_dead_letters(100).await?;
    let mut reconciled = 0;

    for job_id in orphaned {
        if jobs.mark_failed(job_id, MAX_RETRIES_MESSAGE).await? {
            warn!(job = %job_id, "dead-lettered job reconciled to failed");
            reconciled += 1;
        }
    }

    Ok(reconciled)
}
