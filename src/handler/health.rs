use crate::pipeline::{HealthReport, HealthState, HealthStatus};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: HealthStatus,
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Handler for GET /health
pub async fn health_handler(State(health): State<HealthState>) -> (StatusCode, Json<StatusBody>) {
    let status = health.status();
    debug!(?status, "Health check requested");
    (status_code(status), Json(StatusBody { status }))
}

/// Handler for GET /health/sinks: per-sink detail, same status code as `/health`.
pub async fn sinks_handler(State(health): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = health.report();
    (status_code(report.status), Json(report))
}
