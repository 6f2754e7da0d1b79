//! Postgres-backed dispatch queue.
//!
//! One row per dispatch message in `scan_dispatch`. Delivery uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never contend on the
//! same row; the lease token makes ack/retry idempotent against stale
//! deliveries after a lease has been reclaimed.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, VigilError};

use super::config::RetryConfig;
use super::queue::{Delivery, DispatchQueue, RetryDisposition};

#[derive(Clone)]
pub struct PgDispatchQueue {
    pool: PgPool,
    retry: RetryConfig,
    visibility_timeout_secs: i64,
}

impl PgDispatchQueue {
    /// Create a queue handle and verify database health.
    pub async fn new(
        pool: PgPool,
        retry: RetryConfig,
        visibility_timeout_secs: i64,
    ) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                VigilError::Internal(format!("dispatch queue failed Postgres health check: {e}"))
            })?;
        info!("dispatch queue connected to Postgres");

        Ok(Self {
            pool,
            retry,
            visibility_timeout_secs,
        })
    }
}

#[async_trait]
impl DispatchQueue for PgDispatchQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_dispatch (id, scan_job_id, state, attempts, visible_at)
            VALUES ($1, $2, 'ready', 0, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job = %job_id, "enqueued dispatch message");
        Ok(())
    }

    async fn receive(&self, worker_id: &str) -> Result<Option<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, scan_job_id, attempts
            FROM scan_dispatch
            WHERE state = 'ready'
              AND visible_at <= NOW()
            ORDER BY visible_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Ok(None);
        };

        let message_id: Uuid = row.try_get("id")?;
        let job_id: Uuid = row.try_get("scan_job_id")?;
        let attempts: i32 = row.try_get("attempts")?;

        let lease_token = Uuid::now_v7();
        let expires_at = Utc::now() + chrono::Duration::seconds(self.visibility_timeout_secs);

        let updated = sqlx::query(
            r#"
            UPDATE scan_dispatch
            SET state = 'leased',
                attempts = attempts + 1,
                lease_token = $1,
                lease_owner = $2,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE id = $4 AND state = 'ready'
            "#,
        )
        .bind(lease_token)
        .bind(worker_id)
        .bind(expires_at)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Raced with a state change; treat as empty.
            drop(tx);
            return Ok(None);
        }

        tx.commit().await?;

        Ok(Some(Delivery {
            message_id,
            job_id,
            attempt: (attempts + 1).max(1) as u16,
            lease_token,
            lease_expires_at: expires_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE scan_dispatch
            SET state = 'acked',
                lease_token = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE lease_token = $1 AND state = 'leased'
            "#,
        )
        .bind(delivery.lease_token)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            info!(job = %delivery.job_id, "acknowledged dispatch message");
        }
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: Option<String>) -> Result<RetryDisposition> {
        if delivery.attempt >= self.retry.max_attempts {
            let res = sqlx::query(
                r#"
                UPDATE scan_dispatch
                SET state = 'dead_letter',
                    lease_token = NULL,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    last_error = $2,
                    updated_at = NOW()
                WHERE lease_token = $1 AND state = 'leased'
                "#,
            )
            .bind(delivery.lease_token)
            .bind(&error)
            .execute(&self.pool)
            .await?;

            if res.rows_affected() == 0 {
                // Lease already reclaimed elsewhere; nothing to release.
                return Ok(RetryDisposition::Requeued {
                    visible_at: Utc::now(),
                });
            }

            warn!(
                job = %delivery.job_id,
                attempts = delivery.attempt,
                "dispatch message dead-lettered after exhausting retries"
            );
            return Ok(RetryDisposition::DeadLettered);
        }

        let delay_ms = {
            let mut rng = rand::rng();
            self.retry.jittered_delay_ms(delivery.attempt, &mut rng)
        };
        let visible_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);

        let res = sqlx::query(
            r#"
            UPDATE scan_dispatch
            SET state = 'ready',
                lease_token = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                last_error = $2,
                visible_at = $3,
                updated_at = NOW()
            WHERE lease_token = $1 AND state = 'leased'
            "#,
        )
        .bind(delivery.lease_token)
        .bind(&error)
        .bind(visible_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            warn!(
                job = %delivery.job_id,
                attempt = delivery.attempt,
                delay_ms,
                "dispatch message scheduled for redelivery"
            );
        }
        Ok(RetryDisposition::Requeued { visible_at })
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let expired = sqlx::query(
            r#"
            SELECT id, scan_job_id, attempts
            FROM scan_dispatch
            WHERE state = 'leased'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut touched = 0u64;
        let max_attempts = i32::from(self.retry.max_attempts);

        for row in expired {
            let id: Uuid = row.try_get("id")?;
            let job_id: Uuid = row.try_get("scan_job_id")?;
            let attempts: i32 = row.try_get("attempts")?;

            if attempts < max_attempts {
                let delay_ms = {
                    let mut rng = rand::rng();
                    self.retry.jittered_delay_ms(attempts.max(0) as u16, &mut rng)
                };
                sqlx::query(
                    r#"
                    UPDATE scan_dispatch
                    SET state = 'ready',
                        lease_token = NULL,
                        lease_owner = NULL,
                        lease_expires_at = NULL,
                        last_error = COALESCE(last_error, 'lease expired'),
                        visible_at = NOW() + ($2::bigint) * INTERVAL '1 millisecond',
                        updated_at = NOW()
                    WHERE id = $1 AND state = 'leased'
                    "#,
                )
                .bind(id)
                .bind(delay_ms as i64)
                .execute(&self.pool)
                .await?;
                warn!(job = %job_id, attempts, "reclaimed expired lease");
            } else {
                sqlx::query(
                    r#"
                    UPDATE scan_dispatch
                    SET state = 'dead_letter',
                        lease_token = NULL,
                        lease_owner = NULL,
                        lease_expires_at = NULL,
                        last_error = COALESCE(last_error, 'lease expired (max attempts)'),
                        updated_at = NOW()
                    WHERE id = $1 AND state = 'leased'
                    "#,
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
                warn!(job = %job_id, attempts, "expired lease moved to dead letter");
            }
            touched += 1;
        }

        Ok(touched)
    }

    async fn unreconciled_dead_letters(&self, limit: i64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT d.scan_job_id
            FROM scan_dispatch d
            JOIN scan_jobs j ON j.id = d.scan_job_id
            WHERE d.state = 'dead_letter'
              AND j.status IN ('queued', 'scanning')
            ORDER BY d.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<Uuid, _>("scan_job_id").map_err(Into::into))
            .collect()
    }
}
