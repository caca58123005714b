//! Operator endpoints: probe history, forced re-selection and config reload.

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{error::AppError, service::ServiceState};

pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/admin/history", get(history))
        .route("/admin/reselect", post(reselect))
        .route("/admin/reload", post(reload))
        .with_state(state)
}

/// `GET /admin/history` — per-candidate probe counters.
pub async fn history(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    Json(json!({ "candidates": state.selector.history().snapshot() }))
}

/// `POST /admin/reselect` — probe now and return the selection report.
pub async fn reselect(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let selection = state.selector.select_with_report().await;
    Json(json!({ "selection": &*selection }))
}

/// `POST /admin/reload` — re-read the config file and apply it.
///
/// Returns `422` with the validation error when the new file is rejected;
/// the running config is kept in that case.
pub async fn reload(State(state): State<Arc<ServiceState>>) -> Result<impl IntoResponse, AppError> {
    let config = state.reload().await.map_err(AppError::unprocessable)?;
    let endpoints: Vec<&str> = config.endpoints.iter().map(|e| e.name.as_str()).collect();
    Ok(Json(json!({
        "status": "reloaded",
        "endpoints": endpoints,
        "active_endpoint": state.selector.active_endpoint().as_str(),
    })))
}
