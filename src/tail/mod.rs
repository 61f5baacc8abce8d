//! Live tail of ingested lines over a Unix socket.
//!
//! Independent of batching: every line the listener accepts is pushed to the
//! connected observers straight away, newline-terminated. Unix platforms only.

pub mod client;
pub mod server;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use client::follow;
pub use server::{TailHandle, TailServer};

/// Default socket path shared by the server and `logflow tail`.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/logflow-listener.sock";

/// Notice sent to a connection refused because the observer limit was reached.
pub const TOO_MANY_CLIENTS: &str = "[logflow] Too many tail clients connected.\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    pub socket_path: PathBuf,
    pub max_clients: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_clients: 5,
        }
    }
}

#[derive(Error, Debug)]
pub enum TailError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("tail socket already in use: {}", .0.display())]
    InUse(PathBuf),
}
