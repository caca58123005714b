//! Read-only endpoints: liveness and the current selection.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::service::ServiceState;

pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(state)
}

/// `GET /healthz` — always `200 {"status": "ok"}`. Never probes.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /status` — the active endpoint and the last selection report.
///
/// Example response:
/// ```json
/// {
///   "active_endpoint": "http://192.168.137.1:8080/",
///   "uptime_secs": 42,
///   "candidates": ["dev", "local", "prod"],
///   "last_selection": {
///     "chosen": "local",
///     "fallback": false,
///     "outcomes": [ ... ]
///   }
/// }
/// ```
pub async fn status(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let selector = &state.selector;
    Json(json!({
        "active_endpoint": selector.active_endpoint().as_str(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "candidates": selector.candidate_names(),
        "last_selection": selector.last_selection().as_deref(),
    }))
}
