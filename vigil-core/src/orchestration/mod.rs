//! Scan-job orchestration: dispatch queue, retry policy, and worker pool.
//!
//! Coordination between workers happens exclusively through the queue's
//! visibility-timeout lease and the job store's conditional status update;
//! workers share no in-process scan state.

pub mod config;
pub mod persistence;
pub mod queue;
pub mod worker;

pub use config::{OrchestratorConfig, RetryConfig};
pub use persistence::PgDispatchQueue;
pub use queue::{Delivery, DispatchQueue, MessageState, RetryDisposition};
pub use worker::{Worker, WorkerPool, reconcile_dead_letters};
