use crate::handler::health::{health_handler, sinks_handler};
use crate::pipeline::HealthState;
use axum::Router;
use axum::routing::get;

/// Build the health router (`/health` and `/health/sinks`).
pub fn health_router(health: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/sinks", get(sinks_handler))
        .with_state(health)
}
