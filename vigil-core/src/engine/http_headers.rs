//! Web URL engine: response security-header analysis.
//!
//! Fetches the target once and reports missing or insecure security
//! headers as findings. This deliberately stays at the header level; it
//! never crawls or submits anything to the target.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

use crate::domain::{Finding, ScanReport, ScanType, Severity};

use super::{EngineFailure, EngineResult, ScanEngine};

pub struct HttpHeaderEngine {
    client: reqwest::Client,
}

impl HttpHeaderEngine {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("vigil-scan")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpHeaderEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ScanEngine for HttpHeaderEngine {
    fn name(&self) -> &'static str {
        "http-headers"
    }

    async fn scan(&self, scan_type: ScanType, target: &str) -> EngineResult {
        if scan_type != ScanType::WebUrl {
            return Err(EngineFailure::Permanent(format!(
                "http header engine does not support {scan_type} targets"
            )));
        }

        let url = Url::parse(target).map_err(|err| {
            EngineFailure::Permanent(format!("target is not a valid URL: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineFailure::Permanent(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        debug!(url = %url, "probing security headers");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let findings = header_findings(url.as_str(), response.headers());
        debug!(url = %url, count = findings.len(), "header probe finished");
        Ok(ScanReport::new(findings))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> EngineFailure {
    if err.is_builder() || err.is_redirect() {
        EngineFailure::Permanent(format!("request could not be constructed: {err}"))
    } else {
        // Timeouts, refused connections, and DNS blips are all worth a retry.
        EngineFailure::Transient(format!("request failed: {err}"))
    }
}

/// Header checks, adapted from the usual hardening checklist: enforced
/// transport, framing and sniffing protections, and disclosure headers.
fn header_findings(url: &str, headers: &HeaderMap) -> Vec<Finding> {
    let mut findings = Vec::new();

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    match header("content-security-policy") {
        None => findings.push(missing(
            url,
            "Content-Security-Policy",
            Severity::Medium,
            "Add a Content-Security-Policy header to mitigate XSS",
        )),
        Some(value) if value.contains("'unsafe-inline'") || value.contains("'unsafe-eval'") => {
            findings.push(insecure(
                url,
                "Content-Security-Policy",
                &value,
                "Remove 'unsafe-inline' and 'unsafe-eval' from the policy",
            ));
        }
        Some(_) => {}
    }

    match header("x-frame-options") {
        None => findings.push(missing(
            url,
            "X-Frame-Options",
            Severity::Medium,
            "Add an X-Frame-Options header to prevent clickjacking",
        )),
        Some(value) => {
            let upper = value.to_uppercase();
            if upper != "DENY" && upper != "SAMEORIGIN" {
                findings.push(insecure(
                    url,
                    "X-Frame-Options",
                    &value,
                    "Set X-Frame-Options to DENY or SAMEORIGIN",
                ));
            }
        }
    }

    match header("x-content-type-options") {
        None => findings.push(missing(
            url,
            "X-Content-Type-Options",
            Severity::Low,
            "Add X-Content-Type-Options: nosniff to prevent MIME sniffing",
        )),
        Some(value) if !value.eq_ignore_ascii_case("nosniff") => {
            findings.push(insecure(
                url,
                "X-Content-Type-Options",
                &value,
                "Set X-Content-Type-Options to 'nosniff'",
            ));
        }
        Some(_) => {}
    }

    match header("strict-transport-security") {
        None if url.starts_with("https://") => findings.push(missing(
            url,
            "Strict-Transport-Security",
            Severity::Medium,
            "Add an HSTS header to enforce HTTPS connections",
        )),
        Some(value) if !hsts_max_age_ok(&value) => {
            findings.push(insecure(
                url,
                "Strict-Transport-Security",
                &value,
                "Set max-age to at least 31536000",
            ));
        }
        _ => {}
    }

    if header("referrer-policy").is_none() {
        findings.push(missing(
            url,
            "Referrer-Policy",
            Severity::Low,
            "Add a Referrer-Policy header to control referrer information",
        ));
    }

    for disclosure in ["server", "x-powered-by"] {
        if let Some(value) = header(disclosure) {
            let reveals_version = value.chars().any(|c| c.is_ascii_digit());
            if disclosure == "x-powered-by" || reveals_version {
                findings.push(Finding {
                    cve_id: None,
                    severity: Severity::Low,
                    package_name: url.to_string(),
                    installed_version: String::new(),
                    fixed_version: None,
                    title: format!("{disclosure} header reveals implementation details"),
                    description: format!(
                        "Response carries '{disclosure}: {value}'; remove or obfuscate it to \
                         avoid information disclosure"
                    ),
                });
            }
        }
    }

    findings
}

fn hsts_max_age_ok(value: &str) -> bool {
    value
        .split(';')
        .find_map(|part| part.trim().strip_prefix("max-age="))
        .and_then(|age| age.trim().parse::<u64>().ok())
        .map(|age| age >= 31_536_000)
        .unwrap_or(false)
}

fn missing(url: &str, name: &str, severity: Severity, recommendation: &str) -> Finding {
    Finding {
        cve_id: None,
        severity,
        package_name: url.to_string(),
        installed_version: String::new(),
        fixed_version: None,
        title: format!("Missing {name} header"),
        description: recommendation.to_string(),
    }
}

fn insecure(url: &str, name: &str, value: &str, recommendation: &str) -> Finding {
    Finding {
        cve_id: None,
        severity: Severity::Medium,
        package_name: url.to_string(),
        installed_version: String::new(),
        fixed_version: None,
        title: format!("Insecure {name} configuration"),
        description: format!("{recommendation} (current value: {value})"),
    }
}
