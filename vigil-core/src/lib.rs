//! # Vigil Core
//!
//! Core library for the Vigil scan service: durable scan-job bookkeeping,
//! queue-based dispatch with at-least-once delivery, worker claim/retry
//! semantics, and atomic result publication.
//!
//! ## Overview
//!
//! `vigil-core` is the foundation of the Vigil service, offering:
//!
//! - **Domain model**: scan jobs with a monotonic status state machine,
//!   vulnerability findings, and severity summaries
//! - **Scan engines**: a pluggable [`engine::ScanEngine`] boundary with
//!   reference engines for container images (Trivy) and web URLs
//! - **Orchestration**: a Postgres-backed dispatch queue with
//!   visibility-timeout leases, bounded retries, and a dead-letter channel,
//!   plus the worker pool that drives the per-job state machine
//! - **Persistence**: sqlx-backed stores for jobs, findings, and API keys
//! - **Services**: submission (validate, persist, enqueue) and query
//!   (status, findings, summary) facades consumed by the HTTP surface
//!
//! ## Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`domain`]: scan job, finding, and API-key types
//! - [`engine`]: the scan-engine capability and reference implementations
//! - [`orchestration`]: queue contract, Postgres queue, and worker pool
//! - [`persistence`]: durable stores and embedded migrations
//! - [`submission`] / [`query`]: caller-facing services
//! - [`api_types`]: wire-level request/response types

pub mod api_types;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod persistence;
pub mod query;
pub mod submission;

pub use domain::{
    Finding, JobStatus, NewScanJob, ScanJob, ScanReport, ScanType, Severity, SeveritySummary,
    Vulnerability,
};
pub use error::{Result, VigilError};
