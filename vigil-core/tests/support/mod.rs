//! In-memory trait implementations for exercising the orchestration core
//! without a database. Semantics mirror the Postgres-backed stores:
//! conditional claims, monotonic status transitions, atomic publication.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use vigil_core::domain::{
    Finding, JobStatus, NewScanJob, ScanJob, ScanReport, ScanType, Vulnerability,
};
use vigil_core::engine::{EngineFailure, EngineResult, ScanEngine};
use vigil_core::error::{Result, VigilError};
use vigil_core::orchestration::{
    Delivery, DispatchQueue, MessageState, RetryConfig, RetryDisposition,
};
use vigil_core::persistence::{ClaimOutcome, JobStore};

#[derive(Default)]
struct JobsInner {
    jobs: HashMap<Uuid, ScanJob>,
    vulnerabilities: Vec<Vulnerability>,
    /// Every observed (from, to) status transition, in order.
    transitions: Vec<(Uuid, JobStatus, JobStatus)>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobsInner>,
}

impl MemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn transition(inner: &mut JobsInner, job_id: Uuid, next: JobStatus) {
        let current = inner.jobs.get(&job_id).expect("job exists").status;
        assert!(
            current.can_transition(next),
            "illegal transition {current} -> {next} for job {job_id}"
        );
        inner.transitions.push((job_id, current, next));
        inner.jobs.get_mut(&job_id).expect("job exists").status = next;
    }

    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn all_jobs(&self) -> Vec<ScanJob> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    pub async fn vulnerability_count(&self, job_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .vulnerabilities
            .iter()
            .filter(|v| v.scan_job_id == job_id)
            .count()
    }

    pub async fn transitions_for(&self, job_id: Uuid) -> Vec<(JobStatus, JobStatus)> {
        self.inner
            .lock()
            .await
            .transitions
            .iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    /// Test hook: age a live claim so it becomes reclaimable.
    pub async fn age_claim(&self, job_id: Uuid, by: chrono::Duration) {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id).expect("job exists");
        if let Some(started_at) = job.started_at.as_mut() {
            *started_at -= by;
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewScanJob) -> Result<ScanJob> {
        let job = ScanJob {
            id: Uuid::now_v7(),
            scan_type: new_job.scan_type,
            target: new_job.target,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            api_key_id: new_job.api_key_id,
            error_message: None,
        };
        self.inner.lock().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<ClaimOutcome> {
        let mut inner = self.inner.lock().await;

        let Some(job) = inner.jobs.get(&job_id).cloned() else {
            return Ok(ClaimOutcome::NotFound);
        };

        match job.status {
            JobStatus::Queued => {
                Self::transition(&mut inner, job_id, JobStatus::Scanning);
                let job = inner.jobs.get_mut(&job_id).expect("job exists");
                job.started_at = Some(Utc::now());
                Ok(ClaimOutcome::Claimed(job.clone()))
            }
            JobStatus::Scanning => {
                let stale = job
                    .started_at
                    .map(|at| at < Utc::now() - stale_after)
                    .unwrap_or(false);
                if stale {
                    let job = inner.jobs.get_mut(&job_id).expect("job exists");
                    job.started_at = Some(Utc::now());
                    Ok(ClaimOutcome::Reclaimed(job.clone()))
                } else {
                    Ok(ClaimOutcome::Contended)
                }
            }
            status => Ok(ClaimOutcome::AlreadyTerminal(status)),
        }
    }

    async fn release_claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&job_id)
            && job.status == JobStatus::Scanning
        {
            job.started_at = Some(Utc::now() - stale_after - chrono::Duration::seconds(1));
        }
        Ok(())
    }

    async fn publish_report(&self, job_id: Uuid, findings: &[Finding]) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        let Some(job) = inner.jobs.get(&job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Scanning {
            return Ok(false);
        }

        for finding in findings {
            let row = Vulnerability {
                id: Uuid::now_v7(),
                scan_job_id: job_id,
                cve_id: finding.cve_id.clone(),
                severity: finding.severity,
                package_name: finding.package_name.clone(),
                installed_version: finding.installed_version.clone(),
                fixed_version: finding.fixed_version.clone(),
                title: finding.title.clone(),
                description: finding.description.clone(),
                created_at: Utc::now(),
            };
            inner.vulnerabilities.push(row);
        }

        Self::transition(&mut inner, job_id, JobStatus::Completed);
        let job = inner.jobs.get_mut(&job_id).expect("job exists");
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        let Some(job) = inner.jobs.get(&job_id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }

        Self::transition(&mut inner, job_id, JobStatus::Failed);
        let job = inner.jobs.get_mut(&job_id).expect("job exists");
        let now = Utc::now();
        job.started_at.get_or_insert(now);
        job.completed_at = Some(now);
        job.error_message = Some(error.to_string());
        Ok(true)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        Ok(self.inner.lock().await.jobs.get(&job_id).cloned())
    }

    async fn vulnerabilities(&self, job_id: Uuid) -> Result<Vec<Vulnerability>> {
        Ok(self
            .inner
            .lock()
            .await
            .vulnerabilities
            .iter()
            .filter(|v| v.scan_job_id == job_id)
            .cloned()
            .collect())
    }
}

struct MessageRow {
    id: Uuid,
    job_id: Uuid,
    state: MessageState,
    attempts: u16,
    visible_at: chrono::DateTime<Utc>,
    lease_token: Option<Uuid>,
    lease_expires_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct MemoryQueue {
    inner: Mutex<Vec<MessageRow>>,
    retry: RetryConfig,
    visibility_timeout_secs: i64,
    fail_enqueue: AtomicBool,
}

impl MemoryQueue {
    pub fn new(retry: RetryConfig, visibility_timeout_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Vec::new()),
            retry,
            visibility_timeout_secs,
            fail_enqueue: AtomicBool::new(false),
        })
    }

    pub fn fail_next_enqueues(&self) {
        self.fail_enqueue.store(true, Ordering::SeqCst);
    }

    pub async fn state_of(&self, job_id: Uuid) -> Option<MessageState> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|row| row.job_id == job_id)
            .map(|row| row.state)
    }

    pub async fn last_error_of(&self, job_id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|row| row.job_id == job_id)
            .and_then(|row| row.last_error.clone())
    }

    /// Test hook: make a leased message's visibility window elapse.
    pub async fn expire_leases(&self) {
        let mut inner = self.inner.lock().await;
        for row in inner.iter_mut() {
            if row.state == MessageState::Leased {
                row.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(VigilError::Internal("dispatch channel unavailable".into()));
        }

        self.inner.lock().await.push(MessageRow {
            id: Uuid::now_v7(),
            job_id,
            state: MessageState::Ready,
            attempts: 0,
            visible_at: Utc::now(),
            lease_token: None,
            lease_expires_at: None,
            last_error: None,
        });
        Ok(())
    }

    async fn receive(&self, _worker_id: &str) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let Some(row) = inner
            .iter_mut()
            .filter(|row| row.state == MessageState::Ready && row.visible_at <= now)
            .min_by_key(|row| row.visible_at)
        else {
            return Ok(None);
        };

        let lease_token = Uuid::now_v7();
        let expires_at = now + chrono::Duration::seconds(self.visibility_timeout_secs);
        row.state = MessageState::Leased;
        row.attempts += 1;
        row.lease_token = Some(lease_token);
        row.lease_expires_at = Some(expires_at);

        Ok(Some(Delivery {
            message_id: row.id,
            job_id: row.job_id,
            attempt: row.attempts,
            lease_token,
            lease_expires_at: expires_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.iter_mut().find(|row| {
            row.lease_token == Some(delivery.lease_token) && row.state == MessageState::Leased
        }) {
            row.state = MessageState::Acked;
            row.lease_token = None;
            row.lease_expires_at = None;
        }
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: Option<String>) -> Result<RetryDisposition> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.iter_mut().find(|row| {
            row.lease_token == Some(delivery.lease_token) && row.state == MessageState::Leased
        }) else {
            return Ok(RetryDisposition::Requeued {
                visible_at: Utc::now(),
            });
        };

        row.lease_token = None;
        row.lease_expires_at = None;
        row.last_error = error;

        if delivery.attempt >= self.retry.max_attempts {
            row.state = MessageState::DeadLetter;
            return Ok(RetryDisposition::DeadLettered);
        }

        let delay_ms = {
            let mut rng = rand::rng();
            self.retry.jittered_delay_ms(delivery.attempt, &mut rng)
        };
        let visible_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        row.state = MessageState::Ready;
        row.visible_at = visible_at;
        Ok(RetryDisposition::Requeued { visible_at })
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut touched = 0;

        for row in inner.iter_mut() {
            if row.state == MessageState::Leased
                && row.lease_expires_at.map(|at| at < now).unwrap_or(false)
            {
                row.lease_token = None;
                row.lease_expires_at = None;
                if row.attempts >= self.retry.max_attempts {
                    row.state = MessageState::DeadLetter;
                    row.last_error
                        .get_or_insert_with(|| "lease expired (max attempts)".to_string());
                } else {
                    row.state = MessageState::Ready;
                    row.visible_at = now;
                    row.last_error.get_or_insert_with(|| "lease expired".to_string());
                }
                touched += 1;
            }
        }

        Ok(touched)
    }

    async fn unreconciled_dead_letters(&self, limit: i64) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .await
            .iter()
            .filter(|row| row.state == MessageState::DeadLetter)
            .take(limit as usize)
            .map(|row| row.job_id)
            .collect())
    }
}

/// Engine returning a scripted sequence of outcomes; the last entry
/// repeats once the script is exhausted.
pub struct ScriptedEngine {
    script: Mutex<Vec<EngineResult>>,
    invocations: AtomicUsize,
}

impl ScriptedEngine {
    pub fn always(outcome: EngineResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(vec![outcome]),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn sequence(outcomes: Vec<EngineResult>) -> Arc<Self> {
        assert!(!outcomes.is_empty());
        Arc::new(Self {
            script: Mutex::new(outcomes),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn succeeding_with(findings: Vec<Finding>) -> Arc<Self> {
        Self::always(Ok(ScanReport::new(findings)))
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn scan(&self, _scan_type: ScanType, _target: &str) -> EngineResult {
        let mut script = self.script.lock().await;
        let outcome = if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        };
        self.invocations.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

/// Engine that never returns within a test-sized timeout.
pub struct StallingEngine;

#[async_trait]
impl ScanEngine for StallingEngine {
    fn name(&self) -> &'static str {
        "stalling"
    }

    async fn scan(&self, _scan_type: ScanType, _target: &str) -> EngineResult {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(EngineFailure::Transient("unreachable".into()))
    }
}

pub fn finding(cve: &str, severity: vigil_core::domain::Severity) -> Finding {
    Finding {
        cve_id: Some(cve.to_string()),
        severity,
        package_name: "openssl".to_string(),
        installed_version: "3.0.1".to_string(),
        fixed_version: Some("3.0.2".to_string()),
        title: format!("{cve}: test finding"),
        description: "test".to_string(),
    }
}
