//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod run;
pub mod runner;
pub mod status;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tether_core::dto::status::{RepoStatus, StoreStatus};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::repository::Store;
use crate::service::job_service::LARGE_RESULT_BODY_LIMIT;
use crate::service::repo_status::RepoStatusService;
use crate::service::status_cache::StatusCache;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub repo_status: Arc<RepoStatusService>,
    pub store_status: Arc<StatusCache<StoreStatus>>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let repo_cache = Arc::new(StatusCache::<RepoStatus>::new(
            config.status_ok_ttl,
            config.status_fail_ttl,
            config.status_cache_max,
        ));
        let store_status = Arc::new(StatusCache::new(
            config.status_ok_ttl,
            config.status_fail_ttl,
            config.status_cache_max,
        ));

        Self {
            repo_status: Arc::new(RepoStatusService::new(config.repo_root.clone(), repo_cache)),
            store_status,
            store,
            config: Arc::new(config),
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/job/enqueue", post(job::enqueue_job))
        .route("/job/claim", post(job::claim_job))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/sealed-input", post(job::finalize_sealed_input))
        .route("/job/{id}/renew", post(job::renew_lease))
        .route("/job/{id}/complete", post(job::complete_job))
        // Run endpoints
        .route("/run/{run_id}/status", get(run::get_status))
        .route("/run/{run_id}/cancel", post(run::cancel_run))
        .route("/run/{run_id}/events", get(run::list_events))
        .route("/run/{run_id}/events", post(run::append_events))
        .route("/run/{run_id}/events/tail", get(run::tail_events))
        .route("/run/{run_id}/result", get(run::get_result))
        .route(
            "/run/{run_id}/result/large",
            get(run::get_large_result)
                .post(run::put_large_result)
                .layer(DefaultBodyLimit::max(LARGE_RESULT_BODY_LIMIT)),
        )
        // Runner endpoints
        .route("/runner/register", post(runner::register_runner))
        .route("/runner/list", get(runner::list_runners))
        .route("/runner/{id}", get(runner::get_runner))
        .route("/runner/{id}/heartbeat", post(runner::heartbeat))
        // Read-side probes
        .route("/status/repo", get(status::repo_status))
        .route("/status/store", get(status::store_status))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
