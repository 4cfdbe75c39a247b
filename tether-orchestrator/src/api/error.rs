//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::event_service::EventError;
use crate::service::job_service::JobError;
use crate::service::runner_service::RunnerError;
use crate::service::status_cache::ProbeError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// Sealed input that can never be accepted as sent
    Unprocessable(String),
    PayloadTooLarge(String),
    Unavailable(String),
    StoreError(StoreError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::StoreError(other),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let message = err.to_string();
        match err {
            JobError::NotFound(_) | JobError::RunNotFound(_) | JobError::RunnerNotFound(_) => {
                ApiError::NotFound(message)
            }
            JobError::Validation(_) => ApiError::BadRequest(message),
            JobError::Protocol(_) => ApiError::Unprocessable(message),
            JobError::Conflict(_) | JobError::InvalidState(_) | JobError::LeaseLost(_) => {
                ApiError::Conflict(message)
            }
            JobError::TooLarge(_) => ApiError::PayloadTooLarge(message),
            JobError::Store(err) => err.into(),
        }
    }
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::RunNotFound(id) => ApiError::NotFound(format!("Run {} not found", id)),
            EventError::Validation(msg) => ApiError::BadRequest(msg),
            EventError::Store(err) => err.into(),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::NotFound(id) => ApiError::NotFound(format!("Runner {} not found", id)),
            RunnerError::Validation(msg) => ApiError::BadRequest(msg),
            RunnerError::Store(err) => err.into(),
        }
    }
}

impl From<ProbeError> for ApiError {
    fn from(err: ProbeError) -> Self {
        ApiError::Unavailable(err.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
