//! Trivy-backed container image engine.
//!
//! Shells out to the `trivy` binary and maps its JSON report onto domain
//! findings. Trivy is treated as an opaque tool: its exit status and stderr
//! are only inspected to classify failures.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{Finding, ScanReport, ScanType, Severity};

use super::{EngineFailure, EngineResult, ScanEngine};

/// Stderr fragments that identify an unresolvable target rather than an
/// infrastructure hiccup.
const PERMANENT_MARKERS: &[&str] = &[
    "manifest unknown",
    "not found",
    "unauthorized",
    "denied",
    "invalid reference",
    "parse error",
];

pub struct TrivyEngine {
    binary: String,
}

impl TrivyEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn classify_exit(stderr: &str) -> EngineFailure {
        let lower = stderr.to_lowercase();
        if PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            EngineFailure::Permanent(format!("trivy could not resolve target: {}", trim(stderr)))
        } else {
            EngineFailure::Transient(format!("trivy scan failed: {}", trim(stderr)))
        }
    }

    fn parse_report(stdout: &[u8]) -> Result<Vec<Finding>, EngineFailure> {
        let output: TrivyOutput = serde_json::from_slice(stdout).map_err(|err| {
            EngineFailure::Permanent(format!("trivy produced unparseable output: {err}"))
        })?;

        let findings = output
            .results
            .into_iter()
            .flat_map(|result| result.vulnerabilities)
            .map(Finding::from)
            .collect();
        Ok(findings)
    }
}

impl Default for TrivyEngine {
    fn default() -> Self {
        Self::new("trivy")
    }
}

#[async_trait]
impl ScanEngine for TrivyEngine {
    fn name(&self) -> &'static str {
        "trivy"
    }

    async fn scan(&self, scan_type: ScanType, target: &str) -> EngineResult {
        if scan_type != ScanType::DockerImage {
            return Err(EngineFailure::Permanent(format!(
                "trivy engine does not support {scan_type} targets"
            )));
        }

        debug!(target = %target, "invoking trivy image scan");

        let output = Command::new(&self.binary)
            .args(["image", "--format", "json", "--quiet", target])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                // A missing or unlaunchable binary is a deployment problem,
                // not a property of the target.
                EngineFailure::Transient(format!("failed to launch trivy: {err}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(target = %target, status = ?output.status.code(), "trivy exited non-zero");
            return Err(Self::classify_exit(&stderr));
        }

        let findings = Self::parse_report(&output.stdout)?;
        debug!(target = %target, count = findings.len(), "trivy scan finished");
        Ok(ScanReport::new(findings))
    }
}

fn trim(stderr: &str) -> String {
    let trimmed = stderr.trim();
    match trimmed.char_indices().nth(300) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct TrivyOutput {
    #[serde(rename = "Results", default)]
    results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Vec<TrivyVulnerability>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: Option<String>,
    #[serde(rename = "Severity")]
    severity: Option<String>,
    #[serde(rename = "PkgName")]
    pkg_name: Option<String>,
    #[serde(rename = "InstalledVersion")]
    installed_version: Option<String>,
    #[serde(rename = "FixedVersion")]
    fixed_version: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
}

impl From<TrivyVulnerability> for Finding {
    fn from(raw: TrivyVulnerability) -> Self {
        let severity = raw
            .severity
            .as_deref()
            .map(Severity::from_label)
            .unwrap_or(Severity::Unknown);
        let title = raw
            .title
            .or_else(|| raw.vulnerability_id.clone())
            .unwrap_or_else(|| "unnamed vulnerability".to_string());

        Finding {
            cve_id: raw.vulnerability_id,
            severity,
            package_name: raw.pkg_name.unwrap_or_default(),
            installed_version: raw.installed_version.unwrap_or_default(),
            fixed_version: raw.fixed_version,
            title,
            description: raw.description.unwrap_or_default(),
        }
    }
}
