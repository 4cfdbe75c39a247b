//! Job DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobResult, JobStatus, SealedInput};
use crate::domain::kind::JobKind;

/// Request to enqueue a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJob {
    /// Client-chosen job id, so the sealing AAD can be computed up front
    #[serde(default)]
    pub job_id: Option<Uuid>,
    pub project_id: String,
    pub kind: JobKind,
    pub title: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub target_runner_id: Option<String>,
    #[serde(default)]
    pub payload_meta: serde_json::Value,
    #[serde(default)]
    pub sealed_input: Option<SealedInput>,
    /// Hold the job until `FinalizeSealedInput` arrives
    #[serde(default)]
    pub expect_sealed_input: bool,
}

/// Identifiers returned by enqueue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub run_id: Uuid,
}

/// Follow-up call attaching a sealed input to a held job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeSealedInput {
    pub sealed_input: SealedInput,
}

/// Runner asking for its next job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub runner_id: String,
}

/// Response to a claim; `job` is `None` when nothing is leasable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<Job>,
}

/// Lease renewal request from the lease holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewLease {
    pub lease_id: Uuid,
}

/// Outcome of a renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRenewal {
    pub lease_expires_at: DateTime<Utc>,
    /// Set once an operator asked to cancel the run
    pub cancel_requested: bool,
}

/// Final status reported by the lease holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteJob {
    pub lease_id: Uuid,
    pub status: JobStatus,
    pub result: Option<JobResult>,
}

/// Large JSON result upload from the lease holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeResultUpload {
    pub lease_id: Uuid,
    pub result: serde_json::Value,
}
