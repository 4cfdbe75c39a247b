//! Maps a finished process onto the job's terminal status and result

use std::time::Duration;

use serde_json::Value;
use tether_core::domain::job::{JobResult, JobStatus};
use tether_core::domain::kind::ResultPolicy;

use super::executor::{ExecOutcome, ExecReport};

/// What the runner reports for a finished job
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: JobStatus,
    pub result: JobResult,
    /// Uploaded through the large-result channel before completing
    pub large: Option<Value>,
}

impl Completion {
    fn new(status: JobStatus, result: JobResult) -> Self {
        Self {
            status,
            result,
            large: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Failed, JobResult::failed(message))
    }
}

pub fn conclude(policy: ResultPolicy, report: &ExecReport, timeout: Duration) -> Completion {
    match report.outcome {
        ExecOutcome::TimedOut => Completion::new(JobStatus::TimedOut, JobResult::timed_out(timeout)),
        ExecOutcome::Canceled => Completion::new(JobStatus::Canceled, JobResult::canceled()),
        ExecOutcome::Exited { code: None } => Completion::failed("command terminated by signal"),
        ExecOutcome::Exited { code: Some(code) } if code != 0 => {
            Completion::new(JobStatus::Failed, JobResult::exited(code))
        }
        ExecOutcome::Exited { .. } => succeeded(policy, report),
    }
}

fn succeeded(policy: ResultPolicy, report: &ExecReport) -> Completion {
    let Some(limit) = policy.ceiling_bytes() else {
        return Completion::new(JobStatus::Succeeded, JobResult::succeeded(None));
    };

    if report.stdout_overflow {
        return Completion::failed(format!("result exceeds {} bytes", limit));
    }
    if let Err(e) = policy.check_size(report.stdout.len()) {
        return Completion::failed(e.to_string());
    }
    let value: Value = match serde_json::from_slice(&report.stdout) {
        Ok(value) => value,
        Err(e) => return Completion::failed(format!("result is not valid JSON: {}", e)),
    };

    match policy {
        ResultPolicy::JsonLarge => Completion {
            status: JobStatus::Succeeded,
            result: JobResult::succeeded(None),
            large: Some(value),
        },
        _ => Completion::new(JobStatus::Succeeded, JobResult::succeeded(Some(value))),
    }
}
