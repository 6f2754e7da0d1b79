use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Lifecycle of a dispatch message. `acked` and `dead_letter` are
/// terminal; `ready` rows become deliverable once `visible_at` passes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MessageState {
    Ready,
    Leased,
    Acked,
    DeadLetter,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Ready => "ready",
            MessageState::Leased => "leased",
            MessageState::Acked => "acked",
            MessageState::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leased message handed to exactly one worker for the duration of the
/// visibility window. `attempt` counts this delivery (1-based).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: Uuid,
    pub job_id: Uuid,
    pub attempt: u16,
    pub lease_token: Uuid,
    pub lease_expires_at: DateTime<Utc>,
}

/// What became of a message after the worker released it for retry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetryDisposition {
    /// Message returned to `ready`, hidden until `visible_at`.
    Requeued { visible_at: DateTime<Utc> },
    /// Delivery attempts exhausted; the caller must reconcile the job.
    DeadLettered,
}

/// Durable at-least-once dispatch channel.
///
/// Delivered messages are invisible to other consumers until the lease
/// expires; unacknowledged messages are redelivered; messages whose
/// attempts exceed the retry policy move to the dead-letter channel and
/// are never redelivered.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue a dispatch message for a job. The job row must already
    /// exist; callers never enqueue first.
    async fn enqueue(&self, job_id: Uuid) -> Result<()>;

    /// Lease the next visible `ready` message, if any. Increments the
    /// message's delivery-attempt counter.
    async fn receive(&self, worker_id: &str) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery; the message is never redelivered. A stale
    /// lease token is a no-op.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Release a delivery for redelivery after backoff, or dead-letter it
    /// when attempts are exhausted. A stale lease token is a no-op and
    /// reports `Requeued` with the current time.
    async fn retry(&self, delivery: &Delivery, error: Option<String>) -> Result<RetryDisposition>;

    /// Housekeeping: expired leases become redeliverable (or dead-letter
    /// when out of attempts). Returns the number of messages touched.
    async fn reclaim_expired(&self) -> Result<u64>;

    /// Dead-lettered messages whose job has not reached a terminal state,
    /// for the reconciliation sweep.
    async fn unreconciled_dead_letters(&self, limit: i64) -> Result<Vec<Uuid>>;
}
