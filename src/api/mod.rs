//! Status and admin HTTP API.
//!
//! Read-only routes (`/healthz`, `/status`) and operator routes (`/admin/*`)
//! share one listener. Put the port behind a firewall if `/admin` must not be
//! reachable from clients.

use std::sync::Arc;

use axum::Router;

use crate::service::ServiceState;

pub mod admin;
pub mod status;

/// Build the full API router.
pub fn router(state: Arc<ServiceState>) -> Router {
    status::router(Arc::clone(&state)).merge(admin::router(state))
}
