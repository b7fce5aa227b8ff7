//! HTTP route definitions and handlers.
//!
//! Endpoints are grouped by concern: storage qualification, provisioning,
//! profile files, health checks and metrics.

mod health_routes;
mod metrics;
mod profile_routes;
mod provision_routes;
mod storage_routes;

use crate::state::AppState;
use axum::Router;

/// Creates the application router with all configured routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(storage_routes::routes())
        .merge(provision_routes::routes())
        .merge(profile_routes::routes())
        .merge(health_routes::routes())
        .merge(metrics::routes())
        .with_state(state)
}
