//! Runner API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tether_core::domain::runner::Runner;
use tether_core::dto::runner::{RegisterRunner, RunnerSummary};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::runner_service;

/// POST /runner/register
pub async fn register_runner(
    State(state): State<AppState>,
    Json(req): Json<RegisterRunner>,
) -> ApiResult<Json<Runner>> {
    let runner = runner_service::register_runner(state.store.as_ref(), req).await?;

    Ok(Json(runner))
}

/// POST /runner/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    runner_service::update_heartbeat(state.store.as_ref(), &id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /runner/list
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<RunnerSummary>>> {
    let runners = runner_service::list_runners(state.store.as_ref()).await?;

    Ok(Json(runners.into_iter().map(RunnerSummary::from).collect()))
}

/// GET /runner/{id}
pub async fn get_runner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Runner>> {
    let runner = runner_service::get_runner(state.store.as_ref(), &id).await?;

    Ok(Json(runner))
}
