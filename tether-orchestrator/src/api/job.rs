//! Job API Handlers
//!
//! HTTP endpoints for enqueueing jobs and for the runner side of the lease
//! lifecycle.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tether_core::domain::job::Job;
use tether_core::dto::job::{
    ClaimRequest, ClaimResponse, CompleteJob, EnqueueJob, EnqueuedJob, FinalizeSealedInput,
    LeaseRenewal, RenewLease,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::job_service;

// =============================================================================
// Submission
// =============================================================================

/// POST /job/enqueue
/// Validate and queue a new job
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<EnqueueJob>,
) -> ApiResult<(StatusCode, Json<EnqueuedJob>)> {
    tracing::info!("Enqueueing {} job for project {}", req.kind, req.project_id);

    let enqueued = job_service::enqueue(state.store.as_ref(), req).await?;

    Ok((StatusCode::CREATED, Json(enqueued)))
}

/// POST /job/{id}/sealed-input
/// Attach sealed input to a job enqueued with `expect_sealed_input`
pub async fn finalize_sealed_input(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinalizeSealedInput>,
) -> ApiResult<StatusCode> {
    job_service::finalize_sealed_input(state.store.as_ref(), id, req).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /job/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(state.store.as_ref(), id).await?;

    Ok(Json(job))
}

// =============================================================================
// Lease lifecycle (runner side)
// =============================================================================

/// POST /job/claim
/// Lease the next job the calling runner may run
pub async fn claim_job(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<ClaimResponse>> {
    tracing::debug!("Claim request from runner: {}", req.runner_id);

    let job = job_service::claim_next(state.store.as_ref(), &state.config, &req.runner_id).await?;

    Ok(Json(ClaimResponse { job }))
}

/// POST /job/{id}/renew
/// Extend the caller's lease; reports whether cancellation was requested
pub async fn renew_lease(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenewLease>,
) -> ApiResult<Json<LeaseRenewal>> {
    let renewal =
        job_service::renew_lease(state.store.as_ref(), &state.config, id, req.lease_id).await?;

    Ok(Json(renewal))
}

/// POST /job/{id}/complete
/// Record the terminal status reported by the lease holder
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteJob>,
) -> ApiResult<StatusCode> {
    tracing::info!("Completing job {} with status {}", id, req.status);

    job_service::complete(state.store.as_ref(), id, req).await?;

    Ok(StatusCode::NO_CONTENT)
}
