//! Client side of `logflow healthcheck`, used as the container health check.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Port `/health` is served on unless `LOGFLOW_HEALTH_PORT` says otherwise.
const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Error, Debug)]
pub enum HealthcheckError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("logflow reported {0}")]
    Unhealthy(StatusCode),
}

pub async fn healthcheck() -> Result<(), HealthcheckError> {
    healthcheck_with_port(DEFAULT_HEALTH_PORT).await
}

/// Ask the local `/health` endpoint on `port` whether every sink is fine.
///
/// Only a 2xx counts; the 503 logflow answers with after a sink failure is an error.
pub async fn healthcheck_with_port(port: u16) -> Result<(), HealthcheckError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(HealthcheckError::Client)?;

    let url = format!("http://127.0.0.1:{port}/health");
    let status = client
        .get(&url)
        .send()
        .await
        .map_err(|source| HealthcheckError::Unreachable {
            url: url.clone(),
            source,
        })?
        .status();

    if status.is_success() {
        Ok(())
    } else {
        Err(HealthcheckError::Unhealthy(status))
    }
}
