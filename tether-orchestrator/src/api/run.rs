//! Run API Handlers
//!
//! Read-side views of a run (status, events, results) plus cancel and the
//! runner's event and large-result uploads.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tether_core::domain::event::StoredEvent;
use tether_core::domain::job::JobResult;
use tether_core::dto::event::{AppendEvents, EventPage};
use tether_core::dto::job::LargeResultUpload;
use tether_core::dto::status::RunStatusView;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::{event_service, job_service};

/// GET /run/{run_id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunStatusView>> {
    let view = job_service::get_status(state.store.as_ref(), run_id).await?;

    Ok(Json(view))
}

/// POST /run/{run_id}/cancel
/// Cancel a queued run, or ask the runner holding it to stop
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunStatusView>> {
    tracing::info!("Cancel requested for run: {}", run_id);

    let view = job_service::cancel(state.store.as_ref(), run_id).await?;

    Ok(Json(view))
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub after_seq: Option<i64>,
    pub limit: Option<usize>,
}

/// POST /run/{run_id}/events
/// Append a batch of events; replaying a batch id is a no-op
pub async fn append_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<AppendEvents>,
) -> ApiResult<StatusCode> {
    let applied = event_service::append_events(state.store.as_ref(), run_id, req).await?;

    Ok(if applied {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

/// GET /run/{run_id}/events?after_seq=&limit=
pub async fn list_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<EventPage>> {
    let page =
        event_service::list_events(state.store.as_ref(), run_id, query.after_seq, query.limit)
            .await?;

    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub limit: Option<usize>,
}

/// GET /run/{run_id}/events/tail
/// The newest events of a run, oldest first
pub async fn tail_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<Vec<StoredEvent>>> {
    let events = event_service::tail_events(state.store.as_ref(), run_id, query.limit).await?;

    Ok(Json(events))
}

// =============================================================================
// Results
// =============================================================================

/// GET /run/{run_id}/result
/// Inline result of a finished run
pub async fn get_result(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<JobResult>> {
    job_service::get_result(state.store.as_ref(), run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} has no result yet", run_id)))
}

/// POST /run/{run_id}/result/large
pub async fn put_large_result(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(upload): Json<LargeResultUpload>,
) -> ApiResult<StatusCode> {
    job_service::put_large_result(state.store.as_ref(), run_id, upload).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /run/{run_id}/result/large
pub async fn get_large_result(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    job_service::get_large_result(state.store.as_ref(), run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} has no large result", run_id)))
}
