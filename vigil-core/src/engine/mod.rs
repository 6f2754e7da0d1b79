//! Scan-engine boundary.
//!
//! Engines are pluggable: the orchestration core only knows the
//! [`ScanEngine`] contract and the transient/permanent failure taxonomy.
//! Anything that can turn `(scan_type, target)` into a list of findings can
//! be swapped in without touching workers or stores.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ScanReport, ScanType};

pub mod http_headers;
pub mod trivy;

pub use http_headers::HttpHeaderEngine;
pub use trivy::TrivyEngine;

/// Classified engine failure. Transient failures are retried via queue
/// redelivery; permanent failures terminate the job immediately.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineFailure {
    Transient(String),
    Permanent(String),
}

impl EngineFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineFailure::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            EngineFailure::Transient(msg) | EngineFailure::Permanent(msg) => msg,
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineFailure::Transient(msg) => write!(f, "transient scan failure: {msg}"),
            EngineFailure::Permanent(msg) => write!(f, "permanent scan failure: {msg}"),
        }
    }
}

pub type EngineResult = std::result::Result<ScanReport, EngineFailure>;

/// Capability that produces a vulnerability report for a target.
///
/// Implementations must classify their own failures; the worker enforces
/// the invocation timeout and treats elapsed timeouts as transient.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn scan(&self, scan_type: ScanType, target: &str) -> EngineResult;
}

/// Dispatches to a registered engine per scan type. A type with no
/// registered engine fails permanently, mirroring an unsupported target.
pub struct EngineRouter {
    engines: HashMap<ScanType, Arc<dyn ScanEngine>>,
}

impl EngineRouter {
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    pub fn register(mut self, scan_type: ScanType, engine: Arc<dyn ScanEngine>) -> Self {
        self.engines.insert(scan_type, engine);
        self
    }
}

impl Default for EngineRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&'static str> =
            self.engines.values().map(|engine| engine.name()).collect();
        f.debug_struct("EngineRouter")
            .field("engines", &registered)
            .finish()
    }
}

#[async_trait]
impl ScanEngine for EngineRouter {
    fn name(&self) -> &'static str {
        "engine-router"
    }

    async fn scan(&self, scan_type: ScanType, target: &str) -> EngineResult {
        match self.engines.get(&scan_type) {
            Some(engine) => engine.scan(scan_type, target).await,
            None => Err(EngineFailure::Permanent(format!(
                "no scan engine registered for type {scan_type}"
            ))),
        }
    }
}
