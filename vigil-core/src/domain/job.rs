use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VigilError;

/// Kind of target a scan job operates on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanType {
    DockerImage,
    WebUrl,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::DockerImage => "docker-image",
            ScanType::WebUrl => "web-url",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker-image" => Ok(ScanType::DockerImage),
            "web-url" => Ok(ScanType::WebUrl),
            other => Err(VigilError::Validation(format!(
                "invalid scan type '{other}': must be docker-image or web-url"
            ))),
        }
    }
}

/// Lifecycle state of a scan job. Transitions are monotonic: a job never
/// moves backwards, and terminal states are immutable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Scanning,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scanning => "scanning",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Allowed-transition table. `queued` may fail directly when its
    /// dispatch message could not be enqueued or dead-lettered unseen.
    pub fn can_transition(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Scanning)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Scanning, JobStatus::Completed)
                | (JobStatus::Scanning, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "scanning" => Ok(JobStatus::Scanning),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(VigilError::Internal(format!(
                "store returned unknown job status '{other}'"
            ))),
        }
    }
}

/// Persisted scan job row.
///
/// `started_at` is set iff the job has ever been claimed (scanning or
/// terminal); `completed_at` is set iff the job is terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub scan_type: ScanType,
    pub target: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub api_key_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// Fields required to create a job; everything else is store-assigned.
#[derive(Clone, Debug)]
pub struct NewScanJob {
    pub scan_type: ScanType,
    pub target: String,
    pub api_key_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_type_round_trips_through_str() {
        for ty in [ScanType::DockerImage, ScanType::WebUrl] {
            assert_eq!(ty.as_str().parse::<ScanType>().unwrap(), ty);
        }
        assert!("firmware".parse::<ScanType>().is_err());
    }

    #[test]
    fn transition_table_is_monotonic() {
        use JobStatus::*;

        assert!(Queued.can_transition(Scanning));
        assert!(Queued.can_transition(Failed));
        assert!(Scanning.can_transition(Completed));
        assert!(Scanning.can_transition(Failed));

        // No backward or terminal-escaping transitions.
        assert!(!Scanning.can_transition(Queued));
        assert!(!Completed.can_transition(Failed));
        assert!(!Completed.can_transition(Scanning));
        assert!(!Failed.can_transition(Queued));
        assert!(!Failed.can_transition(Completed));
        assert!(!Queued.can_transition(Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Scanning.is_terminal());
    }
}
