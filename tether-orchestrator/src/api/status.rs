//! Read-side probe handlers, both served through the status cache.

use axum::{Json, extract::State};
use tether_core::dto::status::{RepoStatus, StoreStatus};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::store_status as store_probe;

/// GET /status/repo
pub async fn repo_status(State(state): State<AppState>) -> ApiResult<Json<RepoStatus>> {
    let status = state.repo_status.status().await?;

    Ok(Json(status))
}

/// GET /status/store
pub async fn store_status(State(state): State<AppState>) -> ApiResult<Json<StoreStatus>> {
    let status =
        store_probe::store_status(state.store.as_ref(), &state.store_status).await?;

    Ok(Json(status))
}
