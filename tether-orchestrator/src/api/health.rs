//! Liveness probe. Schema readiness lives under `/status/store`.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use super::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": state.store.backend(),
    }))
}
