use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::tail::TailError;

#[derive(Error, Debug)]
pub enum LogflowError {
    #[error("Failed to load configuration: {0}")]
    Config(String),

    #[error("Failed to bind to address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tail server error: {0}")]
    Tail(#[from] TailError),

    #[error("Listener stopped before signalling readiness")]
    NotReady,

    #[error("Task {task} did not stop within the shutdown grace period")]
    ShutdownTimeout { task: &'static str },

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Outcome of a single failed sink call. Never fatal to the pipeline.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid sink configuration: {0}")]
    Config(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
