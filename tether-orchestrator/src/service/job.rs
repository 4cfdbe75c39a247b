//! Job Service
//!
//! Enqueue, sealed-input finalize, lease claim/renew/complete, cancel and
//! result storage. Every ownership change goes through a conditional write
//! on the [`Store`]; this module only decides which writes to attempt.

use chrono::{DateTime, Utc};
use tether_core::domain::job::{Job, JobResult, JobStatus, Lease, SealedInput};
use tether_core::domain::kind::{
    JSON_LARGE_MAX_BYTES, JSON_SMALL_MAX_BYTES, JobKind, ResultPolicy, ResultTooLarge,
};
use tether_core::domain::runner::Runner;
use tether_core::dto::job::{
    CompleteJob, EnqueueJob, EnqueuedJob, FinalizeSealedInput, LargeResultUpload, LeaseRenewal,
};
use tether_core::dto::status::RunStatusView;
use tether_core::schedule::lease_order;
use tether_envelope::{ALGORITHM, Envelope};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{CancelOutcome, Store, StoreError};

/// Upper bound on the encoded sealed input accepted at enqueue/finalize.
pub const MAX_SEALED_INPUT_B64: usize = 256 * 1024;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Runner {0} not found")]
    RunnerNotFound(String),

    #[error("Job {0} already exists")]
    Conflict(Uuid),

    #[error("{0}")]
    Validation(String),

    /// Malformed sealed input or key mismatch. Never worth retrying.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("lease {0} is no longer held")]
    LeaseLost(Uuid),

    #[error(transparent)]
    TooLarge(#[from] ResultTooLarge),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, JobError>;

// =============================================================================
// Enqueue and sealed input
// =============================================================================

/// Validate and persist a new job.
///
/// Sealed input, whether supplied now or promised through
/// `expect_sealed_input`, requires a target runner with a registered key.
pub async fn enqueue(store: &dyn Store, req: EnqueueJob) -> Result<EnqueuedJob> {
    validate_enqueue(&req)?;

    let wants_sealed = req.sealed_input.is_some() || req.expect_sealed_input;
    if wants_sealed {
        let runner = target_runner(store, req.target_runner_id.as_deref()).await?;
        if let Some(sealed) = &req.sealed_input {
            validate_sealed_input(sealed, &runner)?;
        }
    }

    let payload_meta = if req.payload_meta.is_null() {
        serde_json::json!({})
    } else {
        req.payload_meta
    };

    let job = Job {
        id: req.job_id.unwrap_or_else(Uuid::new_v4),
        run_id: Uuid::new_v4(),
        project_id: req.project_id,
        kind: req.kind,
        title: req.title,
        args: req.args,
        target_runner_id: req.target_runner_id,
        payload_meta,
        sealed_input: req.sealed_input,
        awaiting_sealed_input: req.expect_sealed_input,
        status: JobStatus::Queued,
        lease: None,
        attempt: 0,
        cancel_requested: false,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        result: None,
    };

    match store.insert_job(&job).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => return Err(JobError::Conflict(job.id)),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        "Job enqueued: {} (run {}, kind {}, target {}, sealed {})",
        job.id,
        job.run_id,
        job.kind,
        job.target_runner_id.as_deref().unwrap_or("-"),
        if job.awaiting_sealed_input {
            "pending"
        } else if job.sealed_input.is_some() {
            "yes"
        } else {
            "no"
        }
    );

    Ok(EnqueuedJob {
        job_id: job.id,
        run_id: job.run_id,
    })
}

/// Attach sealed input to a job enqueued with `expect_sealed_input`.
pub async fn finalize_sealed_input(
    store: &dyn Store,
    job_id: Uuid,
    req: FinalizeSealedInput,
) -> Result<()> {
    let job = store
        .find_job(job_id)
        .await?
        .ok_or(JobError::NotFound(job_id))?;

    if !job.awaiting_sealed_input || job.status != JobStatus::Queued {
        return Err(JobError::InvalidState(format!(
            "Job {} is not awaiting sealed input",
            job_id
        )));
    }

    let runner = target_runner(store, job.target_runner_id.as_deref()).await?;
    validate_sealed_input(&req.sealed_input, &runner)?;

    if !store.attach_sealed_input(job_id, &req.sealed_input).await? {
        return Err(JobError::InvalidState(format!(
            "Job {} is not awaiting sealed input",
            job_id
        )));
    }

    tracing::info!(
        "Sealed input finalized for job {} ({} bytes, key {})",
        job_id,
        req.sealed_input.sealed_input_b64.len(),
        req.sealed_input.sealed_input_key_id
    );

    Ok(())
}

async fn target_runner(store: &dyn Store, target: Option<&str>) -> Result<Runner> {
    let Some(runner_id) = target else {
        return Err(JobError::Validation(
            "sealed input requires a target_runner_id".to_string(),
        ));
    };

    let runner = store
        .find_runner(runner_id)
        .await?
        .ok_or_else(|| JobError::RunnerNotFound(runner_id.to_string()))?;

    if runner.key_id.is_none() {
        return Err(JobError::Validation(format!(
            "Runner {} has no registered public key",
            runner_id
        )));
    }

    Ok(runner)
}

/// Structural checks on a sealed envelope; no decryption happens here.
fn validate_sealed_input(sealed: &SealedInput, runner: &Runner) -> Result<()> {
    if sealed.sealed_input_alg != ALGORITHM {
        return Err(JobError::Protocol(format!(
            "unsupported sealed input algorithm '{}'",
            sealed.sealed_input_alg
        )));
    }

    if runner.key_id.as_deref() != Some(sealed.sealed_input_key_id.as_str()) {
        return Err(JobError::Protocol(format!(
            "sealed input key id does not match runner {}",
            runner.id
        )));
    }

    if sealed.sealed_input_b64.len() > MAX_SEALED_INPUT_B64 {
        return Err(JobError::Protocol(format!(
            "sealed input exceeds {} bytes",
            MAX_SEALED_INPUT_B64
        )));
    }

    let envelope = Envelope::decode(&sealed.sealed_input_b64)
        .map_err(|e| JobError::Protocol(e.to_string()))?;

    if envelope.alg != sealed.sealed_input_alg || envelope.kid != sealed.sealed_input_key_id {
        return Err(JobError::Protocol(
            "envelope header does not match sealed input metadata".to_string(),
        ));
    }

    Ok(())
}

fn validate_enqueue(req: &EnqueueJob) -> Result<()> {
    if req.project_id.trim().is_empty() {
        return Err(JobError::Validation("project_id cannot be empty".to_string()));
    }

    if req.title.trim().is_empty() {
        return Err(JobError::Validation("title cannot be empty".to_string()));
    }

    if req.args.is_empty() {
        return Err(JobError::Validation("args cannot be empty".to_string()));
    }

    if req.target_runner_id.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(JobError::Validation(
            "target_runner_id cannot be empty when present".to_string(),
        ));
    }

    if !(req.payload_meta.is_null() || req.payload_meta.is_object()) {
        return Err(JobError::Validation(
            "payload_meta must be a JSON object".to_string(),
        ));
    }

    if req.kind == JobKind::Ssh {
        let host = req.payload_meta.get("host").and_then(|h| h.as_str());
        match host.map(str::trim) {
            None | Some("") => {
                return Err(JobError::Validation(
                    "ssh jobs require payload_meta.host".to_string(),
                ));
            }
            // ssh would parse it as an option
            Some(h) if h.starts_with('-') => {
                return Err(JobError::Validation(format!(
                    "ssh host cannot start with '-': {}",
                    h
                )));
            }
            Some(_) => {}
        }
    }

    if req.sealed_input.is_some() && req.expect_sealed_input {
        return Err(JobError::Validation(
            "sealed_input and expect_sealed_input are mutually exclusive".to_string(),
        ));
    }

    // Sealed input is bound to these fields with ':' separators
    let wants_sealed = req.sealed_input.is_some() || req.expect_sealed_input;
    if wants_sealed
        && (req.project_id.contains(':')
            || req.target_runner_id.as_deref().is_some_and(|t| t.contains(':')))
    {
        return Err(JobError::Validation(
            "project_id and target_runner_id cannot contain ':' with sealed input".to_string(),
        ));
    }

    Ok(())
}

// =============================================================================
// Leases
// =============================================================================

/// Lease the next job `runner_id` may run, if any.
pub async fn claim_next(
    store: &dyn Store,
    config: &Config,
    runner_id: &str,
) -> Result<Option<Job>> {
    claim_next_at(store, config, runner_id, Utc::now()).await
}

/// [`claim_next`] evaluated at a fixed point in time.
///
/// Only kinds the runner advertised at registration are considered; an
/// unregistered runner is rejected. Reads the targeted and untargeted
/// windows, orders them with
/// [`lease_order`] and attempts a conditional lease on each candidate in
/// turn. Losing a race for one candidate moves on to the next.
pub async fn claim_next_at(
    store: &dyn Store,
    config: &Config,
    runner_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    if runner_id.trim().is_empty() {
        return Err(JobError::Validation("runner_id cannot be empty".to_string()));
    }

    let runner = store
        .find_runner(runner_id)
        .await?
        .ok_or_else(|| JobError::RunnerNotFound(runner_id.to_string()))?;
    let kinds = runner_kinds(&runner);
    if kinds.is_empty() {
        tracing::debug!("Runner {} advertises no job kinds", runner_id);
        return Ok(None);
    }

    store.touch_runner(runner_id, now).await?;

    let targeted = store
        .targeted_window(runner_id, &kinds, now, config.lease_window)
        .await?;
    let untargeted = store
        .untargeted_window(&kinds, now, config.lease_window)
        .await?;
    let candidates = lease_order(targeted, untargeted);

    let expires_at = now + lease_duration(config);

    for candidate in &candidates {
        let lease = Lease {
            lease_id: Uuid::new_v4(),
            owner: runner_id.to_string(),
            expires_at,
        };

        if let Some(job) = store.try_acquire_lease(candidate.id, &lease, &kinds, now).await? {
            tracing::info!(
                "Job {} leased to runner {} (attempt {}, lease {})",
                job.id,
                runner_id,
                job.attempt,
                lease.lease_id
            );
            return Ok(Some(job));
        }

        tracing::debug!("Lost lease race for job {} ({})", candidate.id, runner_id);
    }

    Ok(None)
}

/// Job kinds among a runner's capabilities; other capability strings are ignored
fn runner_kinds(runner: &Runner) -> Vec<JobKind> {
    runner
        .capabilities
        .iter()
        .filter_map(|c| c.parse().ok())
        .collect()
}

fn lease_duration(config: &Config) -> chrono::Duration {
    chrono::Duration::from_std(config.lease_ttl).unwrap_or(chrono::Duration::seconds(60))
}

pub async fn renew_lease(
    store: &dyn Store,
    config: &Config,
    job_id: Uuid,
    lease_id: Uuid,
) -> Result<LeaseRenewal> {
    let expires_at = Utc::now() + lease_duration(config);

    let job = store
        .renew_lease(job_id, lease_id, expires_at)
        .await?
        .ok_or(JobError::LeaseLost(lease_id))?;

    tracing::debug!(
        "Lease {} on job {} renewed until {}",
        lease_id,
        job_id,
        expires_at
    );

    Ok(LeaseRenewal {
        lease_expires_at: expires_at,
        cancel_requested: job.cancel_requested,
    })
}

/// Record the terminal status reported by the lease holder.
///
/// An inline result over the inline ceiling turns a success into a failure
/// rather than being stored truncated.
pub async fn complete(store: &dyn Store, job_id: Uuid, req: CompleteJob) -> Result<()> {
    validate_completion_status(req.status)?;

    let (status, result) = enforce_inline_ceiling(job_id, req.status, req.result);

    let completed = store
        .complete_job(job_id, req.lease_id, status, result.as_ref(), Utc::now())
        .await?;

    if !completed {
        if store.find_job(job_id).await?.is_none() {
            return Err(JobError::NotFound(job_id));
        }
        return Err(JobError::LeaseLost(req.lease_id));
    }

    tracing::info!("Job {} completed with status {}", job_id, status);

    Ok(())
}

fn enforce_inline_ceiling(
    job_id: Uuid,
    status: JobStatus,
    result: Option<JobResult>,
) -> (JobStatus, Option<JobResult>) {
    let Some(output) = result.as_ref().and_then(|r| r.output.as_ref()) else {
        return (status, result);
    };

    let len = output.to_string().len();
    match ResultPolicy::JsonSmall.check_size(len) {
        Ok(()) => (status, result),
        Err(too_large) => {
            tracing::warn!("Job {} inline result rejected: {}", job_id, too_large);
            (JobStatus::Failed, Some(JobResult::failed(too_large.to_string())))
        }
    }
}

fn validate_completion_status(status: JobStatus) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(JobError::Validation(format!(
            "Invalid completion status: {}",
            status
        )))
    }
}

// =============================================================================
// Cancel and status
// =============================================================================

pub async fn cancel(store: &dyn Store, run_id: Uuid) -> Result<RunStatusView> {
    let job = find_by_run(store, run_id).await?;

    let outcome = store
        .request_cancel(job.id, Utc::now())
        .await?
        .ok_or(JobError::RunNotFound(run_id))?;

    let job = match outcome {
        CancelOutcome::Canceled(job) => {
            tracing::info!("Run {} canceled before execution", run_id);
            job
        }
        CancelOutcome::Requested(job) => {
            tracing::info!(
                "Cancel requested for run {} (held by {})",
                run_id,
                job.lease.as_ref().map(|l| l.owner.as_str()).unwrap_or("-")
            );
            job
        }
        CancelOutcome::AlreadyTerminal(job) => job,
    };

    Ok(RunStatusView::from(&job))
}

pub async fn get_job(store: &dyn Store, id: Uuid) -> Result<Job> {
    store.find_job(id).await?.ok_or(JobError::NotFound(id))
}

pub async fn find_by_run(store: &dyn Store, run_id: Uuid) -> Result<Job> {
    store
        .find_job_by_run(run_id)
        .await?
        .ok_or(JobError::RunNotFound(run_id))
}

pub async fn get_status(store: &dyn Store, run_id: Uuid) -> Result<RunStatusView> {
    let job = find_by_run(store, run_id).await?;
    Ok(RunStatusView::from(&job))
}

// =============================================================================
// Results
// =============================================================================

/// Inline result of a finished run.
pub async fn get_result(store: &dyn Store, run_id: Uuid) -> Result<Option<JobResult>> {
    Ok(find_by_run(store, run_id).await?.result)
}

/// Store the large JSON result of an `export`-style job. The uploader must
/// hold the job's lease.
pub async fn put_large_result(
    store: &dyn Store,
    run_id: Uuid,
    upload: LargeResultUpload,
) -> Result<()> {
    let job = find_by_run(store, run_id).await?;

    if job.kind.result_policy() != ResultPolicy::JsonLarge {
        return Err(JobError::Validation(format!(
            "{} jobs do not produce large results",
            job.kind
        )));
    }

    let holds_lease = job.status == JobStatus::Leased
        && job.lease.as_ref().is_some_and(|l| l.lease_id == upload.lease_id);
    if !holds_lease {
        return Err(JobError::LeaseLost(upload.lease_id));
    }

    let len = upload.result.to_string().len();
    ResultPolicy::JsonLarge.check_size(len)?;

    store.put_large_result(run_id, &upload.result).await?;

    tracing::info!("Stored large result for run {} ({} bytes)", run_id, len);

    Ok(())
}

pub async fn get_large_result(
    store: &dyn Store,
    run_id: Uuid,
) -> Result<Option<serde_json::Value>> {
    find_by_run(store, run_id).await?;
    Ok(store.get_large_result(run_id).await?)
}

/// Largest request body the large-result route has to accept.
pub const LARGE_RESULT_BODY_LIMIT: usize = JSON_LARGE_MAX_BYTES + JSON_SMALL_MAX_BYTES;
