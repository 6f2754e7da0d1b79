//! Submission service: validate, persist, enqueue.
//!
//! Ordering rule: the job row must exist before the dispatch message is
//! enqueued, so a worker can never receive a message for a nonexistent
//! job. When enqueueing fails after the row is written, the row is forced
//! to `failed` instead of leaving an orphaned `queued` job.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{NewScanJob, ScanJob, ScanType};
use crate::error::{Result, VigilError};
use crate::orchestration::DispatchQueue;
use crate::persistence::JobStore;

/// Upper bound on accepted target strings.
pub const MAX_TARGET_LEN: usize = 512;

pub struct SubmissionService {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
}

impl SubmissionService {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self { jobs, queue }
    }

    /// Accept a scan request. Returns the created job (status `queued`)
    /// without waiting for the scan.
    pub async fn submit(
        &self,
        scan_type: &str,
        target: &str,
        api_key_id: Option<Uuid>,
    ) -> Result<ScanJob> {
        let scan_type = ScanType::from_str(scan_type)?;
        let target = validate_target(scan_type, target)?;

        let job = self
            .jobs
            .create(NewScanJob {
                scan_type,
                target,
                api_key_id,
            })
            .await?;

        if let Err(err) = self.queue.enqueue(job.id).await {
            let message = format!("failed to enqueue dispatch message: {err}");
            error!(job = %job.id, error = %err, "enqueue failed, failing job");
            // Best effort; an error here still surfaces the original cause.
            let _ = self.jobs.mark_failed(job.id, &message).await;
            return Err(VigilError::Internal(message));
        }

        info!(job = %job.id, scan_type = %job.scan_type, target = %job.target, "scan accepted");
        Ok(job)
    }
}

/// Validate and normalize a target for its scan type.
///
/// Image references without a tag or digest are pinned to `:latest` so the
/// job records exactly what will be scanned.
pub fn validate_target(scan_type: ScanType, target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(VigilError::Validation(
            "target must not be empty".to_string(),
        ));
    }
    if target.len() > MAX_TARGET_LEN {
        return Err(VigilError::Validation(format!(
            "target exceeds {MAX_TARGET_LEN} characters"
        )));
    }

    let normalized = match scan_type {
        ScanType::DockerImage if !target.contains(':') && !target.contains('@') => {
            format!("{target}:latest")
        }
        _ => target.to_string(),
    };

    Ok(normalized)
}
