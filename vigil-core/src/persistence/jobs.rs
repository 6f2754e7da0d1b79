//! Scan-job store.
//!
//! The `status` column is the single mutual-exclusion point between
//! workers: every transition is a conditional update executed atomically
//! by Postgres, never a read-then-write pair.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Finding, JobStatus, NewScanJob, ScanJob, ScanType, Severity, Vulnerability};
use crate::error::{Result, VigilError};

/// Result of a claim attempt on a job.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    /// Fresh `queued -> scanning` claim; this worker owns the job.
    Claimed(ScanJob),
    /// Stalled `scanning` claim taken over after the grace period.
    Reclaimed(ScanJob),
    /// Job already reached a terminal state; redelivery should be acked.
    AlreadyTerminal(JobStatus),
    /// Another worker holds a live claim; try again later.
    Contended,
    /// No such job row.
    NotFound,
}

/// Repository contract for durable job state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, new_job: NewScanJob) -> Result<ScanJob>;

    /// Conditionally claim a job for scanning. Succeeds on `queued`, or on
    /// `scanning` whose `started_at` is older than `stale_after`.
    async fn claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<ClaimOutcome>;

    /// Give up a held claim after a transient failure: the job keeps its
    /// `scanning` status (transitions never go backwards), but the claim
    /// is aged past `stale_after` so the next redelivery can reclaim it
    /// immediately.
    async fn release_claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<()>;

    /// Atomically insert the full finding batch and complete the job.
    /// Returns `false` (writing nothing) when the claim was lost.
    async fn publish_report(&self, job_id: Uuid, findings: &[Finding]) -> Result<bool>;

    /// Force a non-terminal job to `failed`. Returns `false` when the job
    /// was already terminal (terminal states are immutable).
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<bool>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>>;

    async fn vulnerabilities(&self, job_id: Uuid) -> Result<Vec<Vulnerability>>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, scan_type, target, status, created_at, started_at, completed_at, \
                           api_key_id, error_message";

fn job_from_row(row: &PgRow) -> Result<ScanJob> {
    let scan_type: String = row.try_get("scan_type")?;
    let status: String = row.try_get("status")?;

    Ok(ScanJob {
        id: row.try_get("id")?,
        scan_type: ScanType::from_str(&scan_type)
            .map_err(|_| VigilError::Internal(format!("unknown scan_type '{scan_type}'")))?,
        target: row.try_get("target")?,
        status: JobStatus::from_str(&status)?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        api_key_id: row.try_get("api_key_id")?,
        error_message: row.try_get("error_message")?,
    })
}

fn vulnerability_from_row(row: &PgRow) -> Result<Vulnerability> {
    let severity: String = row.try_get("severity")?;

    Ok(Vulnerability {
        id: row.try_get("id")?,
        scan_job_id: row.try_get("scan_job_id")?,
        cve_id: row.try_get("cve_id")?,
        severity: Severity::from_label(&severity),
        package_name: row.try_get("package_name")?,
        installed_version: row.try_get("installed_version")?,
        fixed_version: row.try_get("fixed_version")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new_job: NewScanJob) -> Result<ScanJob> {
        let id = Uuid::now_v7();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scan_jobs (id, scan_type, target, status, created_at, api_key_id)
            VALUES ($1, $2, $3, 'queued', NOW(), $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_job.scan_type.as_str())
        .bind(&new_job.target)
        .bind(new_job.api_key_id)
        .fetch_one(&self.pool)
        .await?;

        let job = job_from_row(&row)?;
        info!(job = %job.id, scan_type = %job.scan_type, "created scan job");
        Ok(job)
    }

    async fn claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<ClaimOutcome> {
        // Fresh claim: exactly one worker wins the queued -> scanning race.
        let row = sqlx::query(&format!(
            r#"
            UPDATE scan_jobs
            SET status = 'scanning', started_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(job_from_row(&row)?));
        }

        // Stalled claim: the same conditional-write shape, checked against
        // the stale `scanning` state instead of `queued`.
        let row = sqlx::query(&format!(
            r#"
            UPDATE scan_jobs
            SET started_at = NOW()
            WHERE id = $1
              AND status = 'scanning'
              AND started_at < NOW() - ($2::bigint) * INTERVAL '1 second'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(stale_after.num_seconds())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Reclaimed(job_from_row(&row)?));
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM scan_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            None => Ok(ClaimOutcome::NotFound),
            Some(raw) => {
                let status = JobStatus::from_str(&raw)?;
                if status.is_terminal() {
                    Ok(ClaimOutcome::AlreadyTerminal(status))
                } else {
                    Ok(ClaimOutcome::Contended)
                }
            }
        }
    }

    async fn release_claim(&self, job_id: Uuid, stale_after: chrono::Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET started_at = NOW() - ($2::bigint + 1) * INTERVAL '1 second'
            WHERE id = $1 AND status = 'scanning'
            "#,
        )
        .bind(job_id)
        .bind(stale_after.num_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish_report(&self, job_id: Uuid, findings: &[Finding]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        for finding in findings {
            sqlx::query(
                r#"
                INSERT INTO vulnerabilities (
                    id, scan_job_id, cve_id, severity, package_name,
                    installed_version, fixed_version, title, description, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(job_id)
            .bind(&finding.cve_id)
            .bind(finding.severity.as_str())
            .bind(&finding.package_name)
            .bind(&finding.installed_version)
            .bind(&finding.fixed_version)
            .bind(&finding.title)
            .bind(&finding.description)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1 AND status = 'scanning'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Claim lost between scan and publication; leave no rows behind.
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        info!(job = %job_id, findings = findings.len(), "published scan report");
        Ok(true)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'failed',
                started_at = COALESCE(started_at, NOW()),
                completed_at = NOW(),
                error_message = $2
            WHERE id = $1 AND status IN ('queued', 'scanning')
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn vulnerabilities(&self, job_id: Uuid) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query(
            r#"
            SELECT id, scan_job_id, cve_id, severity, package_name,
                   installed_version, fixed_version, title, description, created_at
            FROM vulnerabilities
            WHERE scan_job_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(vulnerability_from_row).collect()
    }
}
