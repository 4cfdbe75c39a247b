//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::kind::JobKind;

/// Exit code reported for commands killed by the wall-clock timeout
pub const EXIT_CODE_TIMEOUT: i32 = 124;

/// Exit code reported for commands stopped by a cancel request
pub const EXIT_CODE_CANCELED: i32 = 130;

/// Job record
///
/// Structure shared between orchestrator (persists) and runner (executes).
/// A job with a `target_runner_id` is targeted and may only be leased by
/// that runner; otherwise any runner may claim it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub run_id: Uuid,
    pub project_id: String,
    pub kind: JobKind,
    pub title: String,
    pub args: Vec<String>,
    pub target_runner_id: Option<String>,
    #[serde(default)]
    pub payload_meta: serde_json::Value,
    pub sealed_input: Option<SealedInput>,
    /// Set when the job was enqueued expecting a follow-up finalize call
    #[serde(default)]
    pub awaiting_sealed_input: bool,
    pub status: JobStatus,
    pub lease: Option<Lease>,
    pub attempt: u32,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
}

impl Job {
    /// True if the job is waiting in the queue and nobody holds a live lease
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        if self.awaiting_sealed_input || self.cancel_requested {
            return false;
        }
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Leased => self.lease.as_ref().is_none_or(|l| !l.is_active(now)),
            _ => false,
        }
    }

    /// True if `runner_id` may lease this job
    pub fn eligible_for(&self, runner_id: &str) -> bool {
        self.target_runner_id
            .as_deref()
            .is_none_or(|target| target == runner_id)
    }

    /// Host the job runs against, for SSH kinds
    pub fn host(&self) -> Option<&str> {
        self.payload_meta.get("host").and_then(|v| v.as_str())
    }
}

/// Sealed secret payload attached to a job
///
/// The envelope is opaque to the control plane; only the target runner's
/// private key can open it, and only with the AAD derived from this job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedInput {
    pub sealed_input_b64: String,
    pub sealed_input_alg: String,
    pub sealed_input_key_id: String,
}

/// A time-boxed exclusive claim on a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Uuid,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Leased,
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
}

impl JobStatus {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Leased => "Leased",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::Canceled => "Canceled",
            JobStatus::TimedOut => "TimedOut",
        }
    }

    /// Parses the stored representation, `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Queued" => Some(JobStatus::Queued),
            "Leased" => Some(JobStatus::Leased),
            "Succeeded" => Some(JobStatus::Succeeded),
            "Failed" => Some(JobStatus::Failed),
            "Canceled" => Some(JobStatus::Canceled),
            "TimedOut" => Some(JobStatus::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub exit_code: i32,
    /// Inline JSON result for `json_small` kinds
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl JobResult {
    pub fn succeeded(output: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            output,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: 1,
            output: None,
            error_message: Some(message.into()),
        }
    }

    pub fn exited(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
            output: None,
            error_message: Some(format!("command exited with code {}", exit_code)),
        }
    }

    pub fn timed_out(after: std::time::Duration) -> Self {
        Self {
            success: false,
            exit_code: EXIT_CODE_TIMEOUT,
            output: None,
            error_message: Some(format!("command timed out after {}s", after.as_secs())),
        }
    }

    pub fn canceled() -> Self {
        Self {
            success: false,
            exit_code: EXIT_CODE_CANCELED,
            output: None,
            error_message: Some("canceled".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            project_id: "proj".to_string(),
            kind: JobKind::Custom,
            title: "echo".to_string(),
            args: vec!["echo".to_string(), "hi".to_string()],
            target_runner_id: None,
            payload_meta: serde_json::json!({}),
            sealed_input: None,
            awaiting_sealed_input: false,
            status: JobStatus::Queued,
            lease: None,
            attempt: 0,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Leased.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_status_parse_matches_as_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Leased,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Canceled,
            JobStatus::TimedOut,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("Running"), None);
    }

    #[test]
    fn test_leasable_respects_lease_expiry() {
        let now = Utc::now();
        let mut job = sample_job();
        assert!(job.is_leasable(now));

        job.status = JobStatus::Leased;
        job.lease = Some(Lease {
            lease_id: Uuid::new_v4(),
            owner: "runner-a".to_string(),
            expires_at: now + Duration::seconds(30),
        });
        assert!(!job.is_leasable(now));
        assert!(job.is_leasable(now + Duration::seconds(31)));

        job.status = JobStatus::Succeeded;
        assert!(!job.is_leasable(now + Duration::seconds(31)));
    }

    #[test]
    fn test_awaiting_sealed_input_is_not_leasable() {
        let mut job = sample_job();
        job.awaiting_sealed_input = true;
        assert!(!job.is_leasable(Utc::now()));
    }

    #[test]
    fn test_eligibility() {
        let mut job = sample_job();
        assert!(job.eligible_for("anyone"));
        job.target_runner_id = Some("runner-a".to_string());
        assert!(job.eligible_for("runner-a"));
        assert!(!job.eligible_for("runner-b"));
    }

    #[test]
    fn test_job_result_constructors() {
        assert!(JobResult::succeeded(None).success);
        assert_eq!(JobResult::exited(3).exit_code, 3);
        assert_eq!(
            JobResult::timed_out(std::time::Duration::from_secs(5)).exit_code,
            EXIT_CODE_TIMEOUT
        );
        assert_eq!(JobResult::canceled().exit_code, EXIT_CODE_CANCELED);
    }
}
