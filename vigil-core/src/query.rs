//! Query service: job status, findings, and severity summary.

use std::sync::Arc;

use uuid::Uuid;

use crate::api_types::{ScanResultsResponse, VulnerabilityDto};
use crate::domain::{JobStatus, SeveritySummary};
use crate::error::{Result, VigilError};
use crate::persistence::JobStore;

pub struct QueryService {
    jobs: Arc<dyn JobStore>,
}

impl QueryService {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Assemble the caller-facing view of a job.
    ///
    /// Findings and the summary are exposed only for `completed` jobs, and
    /// both are computed from the same fetched rows, so the counts always
    /// match the list.
    pub async fn results(&self, scan_id: Uuid) -> Result<ScanResultsResponse> {
        let job = self
            .jobs
            .get(scan_id)
            .await?
            .ok_or_else(|| VigilError::NotFound(format!("scan {scan_id} not found")))?;

        let mut response = ScanResultsResponse {
            scan_id: job.id,
            scan_type: job.scan_type,
            target: job.target,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            summary: None,
            vulnerabilities: None,
            error_message: None,
        };

        match job.status {
            JobStatus::Completed => {
                let rows = self.jobs.vulnerabilities(scan_id).await?;
                response.summary = Some(SeveritySummary::from_rows(&rows));
                response.vulnerabilities =
                    Some(rows.into_iter().map(VulnerabilityDto::from).collect());
            }
            JobStatus::Failed => {
                response.error_message = job.error_message;
            }
            JobStatus::Queued | JobStatus::Scanning => {}
        }

        Ok(response)
    }
}
