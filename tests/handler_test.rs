use axum::http::StatusCode;
use axum_test::TestServer;
use logflow::app::router::health_router;
use logflow::error::SinkError;
use logflow::pipeline::HealthState;
use serde_json::{Value, json};

#[tokio::test]
async fn test_health_is_healthy_before_any_batch() {
    let health = HealthState::new();
    health.register("stdout");
    let server = TestServer::new(health_router(health)).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    response.assert_json(&json!({ "status": "healthy" }));
}

#[tokio::test]
async fn test_health_is_unavailable_after_failed_write() {
    let health = HealthState::new();
    let ok = health.register("file");
    let failing = health.register("s3");
    health.record_write(ok, &Ok(()));
    health.record_write(failing, &Err(SinkError::Rejected("bucket gone".into())));
    let server = TestServer::new(health_router(health)).unwrap();

    let response = server.get("/health").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    response.assert_json(&json!({ "status": "unhealthy" }));
}

#[tokio::test]
async fn test_health_recovers_after_successful_write() {
    let health = HealthState::new();
    let id = health.register("s3");
    health.record_write(id, &Err(SinkError::Rejected("down".into())));
    health.record_write(id, &Ok(()));
    let server = TestServer::new(health_router(health)).unwrap();

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_sinks_endpoint_reports_each_sink() {
    let health = HealthState::new();
    let file = health.register("file");
    let s3 = health.register("s3");
    health.record_write(file, &Ok(()));
    health.record_probe(s3, &Err(SinkError::Rejected("bucket gone".into())));
    let server = TestServer::new(health_router(health)).unwrap();

    let response = server.get("/health/sinks").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json();
    assert_eq!(body["status"], "unhealthy");
    let sinks = body["sinks"].as_array().unwrap();
    assert_eq!(sinks.len(), 2);
    assert_eq!(sinks[0]["name"], "file");
    assert_eq!(sinks[0]["write"], "healthy");
    assert!(sinks[0]["last_write_at"].is_string());
    assert_eq!(sinks[1]["name"], "s3");
    assert_eq!(sinks[1]["write"], "unknown");
    assert_eq!(sinks[1]["probe"], "unhealthy");
    assert!(sinks[1]["last_error"].as_str().unwrap().contains("bucket gone"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let server = TestServer::new(health_router(HealthState::new())).unwrap();
    server.get("/v1/health").await.assert_status_not_found();
}
