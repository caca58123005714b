//! HTTP error type for the status/admin API.
//!
//! [`AppError`] pairs an [`anyhow::Error`] with the status code it should be
//! reported as. The blanket [`From`] impl maps any error to `500`, so handlers
//! can still propagate with `?`; paths that know better (e.g. a rejected
//! config on reload) pick a status explicitly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    source: anyhow::Error,
}

impl AppError {
    /// The request was understood but its input (e.g. a config file) was rejected.
    pub fn unprocessable(source: impl Into<anyhow::Error>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // `{:#}` keeps the anyhow context chain on one line.
        let message = format!("{:#}", self.source);
        tracing::warn!(status = self.status.as_u16(), error = %message, "handler error");
        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            source: e.into(),
        }
    }
}
