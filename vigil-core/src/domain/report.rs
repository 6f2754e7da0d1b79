use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categorical risk level of a finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse used for engine output and stored rows; anything
    /// unrecognized maps to `Unknown` rather than failing the scan.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding produced by a scan engine, not yet persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Finding {
    pub cve_id: Option<String>,
    pub severity: Severity,
    pub package_name: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub title: String,
    pub description: String,
}

/// Structured report returned by a scan engine on success.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }
}

/// Persisted vulnerability row, written once in the batch that completes
/// its owning job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: Uuid,
    pub scan_job_id: Uuid,
    pub cve_id: Option<String>,
    pub severity: Severity,
    pub package_name: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Per-severity counts over a job's vulnerability rows. `total` counts
/// every row, including ones with unknown severity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub total: u32,
}

impl SeveritySummary {
    pub fn tally<'a, I>(severities: I) -> Self
    where
        I: IntoIterator<Item = &'a Severity>,
    {
        let mut summary = Self::default();
        for severity in severities {
            match severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => {}
            }
            summary.total += 1;
        }
        summary
    }

    pub fn from_rows(rows: &[Vulnerability]) -> Self {
        Self::tally(rows.iter().map(|row| &row.severity))
    }
}
