//! Wire-level request/response types shared with the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{JobStatus, ScanType, Severity, SeveritySummary, Vulnerability};

/// Body of `POST /scans`. `scan_type` arrives as a raw string so that an
/// unrecognized value surfaces as a validation error, not a decode error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitScanRequest {
    #[serde(rename = "type")]
    pub scan_type: String,
    pub target: String,
}

/// Body of the 202 response to `POST /scans`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitScanResponse {
    pub scan_id: Uuid,
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub target: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VulnerabilityDto {
    pub cve_id: Option<String>,
    pub severity: Severity,
    pub package_name: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub title: String,
    pub description: String,
}

impl From<Vulnerability> for VulnerabilityDto {
    fn from(row: Vulnerability) -> Self {
        Self {
            cve_id: row.cve_id,
            severity: row.severity,
            package_name: row.package_name,
            installed_version: row.installed_version,
            fixed_version: row.fixed_version,
            title: row.title,
            description: row.description,
        }
    }
}

/// Body of `GET /scans/{scan_id}`. `summary` and `vulnerabilities` are
/// present only for completed jobs; `error_message` only for failed ones.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanResultsResponse {
    pub scan_id: Uuid,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub target: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SeveritySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<VulnerabilityDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
