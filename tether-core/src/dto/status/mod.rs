//! Status DTOs for runs and read-side probes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus};

/// Current state of a run, as seen by waiters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusView {
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempt: u32,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for RunStatusView {
    fn from(job: &Job) -> Self {
        Self {
            run_id: job.run_id,
            job_id: job.id,
            status: job.status,
            attempt: job.attempt,
            error_message: job.result.as_ref().and_then(|r| r.error_message.clone()),
            completed_at: job.completed_at,
        }
    }
}

/// Git working-tree state of the control plane's infrastructure repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub branch: Option<String>,
    pub head: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub changed: u32,
    pub untracked: u32,
}

impl RepoStatus {
    pub fn is_dirty(&self) -> bool {
        self.changed > 0 || self.untracked > 0
    }
}

/// Whether the durable store carries every table the control plane needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub backend: String,
    pub ready: bool,
    pub missing_tables: Vec<String>,
}
