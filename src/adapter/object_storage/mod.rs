//! S3-compatible object storage sink.
//!
//! Each batch becomes one object, `<prefix>/<timestamp>-<random>.jsonl`,
//! uploaded with a signed path-style `PUT`. Works against AWS S3 and MinIO.

pub mod sigv4;

use crate::domain::Batch;
use crate::error::SinkError;
use crate::port::{Sink, SinkFuture};
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, Url};
use sigv4::{Credentials, RequestToSign};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const SERVICE: &str = "s3";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in a `SinkError::Http`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
    pub request_timeout: Duration,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "logflow-ingest".to_string(),
            region: "us-east-1".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            prefix: "logs".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct ObjectStorageSink {
    client: Client,
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    prefix: String,
    credentials: Credentials,
}

impl ObjectStorageSink {
    pub fn new(config: ObjectStorageConfig) -> Result<Self, SinkError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let url = Url::parse(&endpoint)
            .map_err(|e| SinkError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SinkError::Config(format!("endpoint {endpoint} has no host")));
            }
        };
        if config.bucket.trim().is_empty() {
            return Err(SinkError::Config("bucket cannot be empty".into()));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            host,
            bucket: config.bucket,
            region: config.region,
            prefix: config.prefix.trim_matches('/').to_string(),
            credentials: Credentials {
                access_key: config.access_key,
                secret_key: config.secret_key,
            },
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn next_key(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let random = Uuid::new_v4().simple();
        if self.prefix.is_empty() {
            format!("{timestamp}-{random}.jsonl")
        } else {
            format!("{}/{timestamp}-{random}.jsonl", self.prefix)
        }
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<(), SinkError> {
        let signed = sigv4::sign(
            &RequestToSign {
                method: method.as_str(),
                host: &self.host,
                path,
                payload: &body,
            },
            &self.credentials,
            &self.region,
            SERVICE,
            Utc::now(),
        );
        let url = format!("{}{}", self.endpoint, sigv4::uri_encode(path, false));

        let response = self
            .client
            .request(method, url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
        Err(SinkError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Upload one batch and return the object key.
    pub async fn put_batch(&self, batch: &Batch) -> Result<String, SinkError> {
        let key = self.next_key();
        let path = format!("/{}/{}", self.bucket, key);
        self.send_signed(Method::PUT, &path, batch.to_ndjson().into_bytes())
            .await?;
        Ok(key)
    }

    /// Cheap reachability check: `HEAD` on the bucket.
    pub async fn check_bucket(&self) -> Result<(), SinkError> {
        let path = format!("/{}", self.bucket);
        match self.send_signed(Method::HEAD, &path, Vec::new()).await {
            Err(SinkError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(SinkError::Http {
                    status,
                    body: format!("bucket {} does not exist", self.bucket),
                })
            }
            other => other,
        }
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

impl Sink for ObjectStorageSink {
    fn name(&self) -> &str {
        "s3"
    }

    fn write_batch<'a>(&'a self, batch: &'a Batch) -> SinkFuture<'a> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let key = self.put_batch(batch).await?;
            debug!(
                bucket = %self.bucket,
                key = %key,
                lines = batch.len(),
                bytes = batch.byte_size(),
                "Uploaded batch"
            );
            Ok(())
        })
    }

    fn probe(&self) -> Option<SinkFuture<'_>> {
        Some(Box::pin(self.check_bucket()))
    }
}
