//! Client side of the ingestion protocol: one JSON log record per datagram.
//!
//! Backs `logflow forward`, which pipes stdin into a running listener and
//! keeps a heartbeat going so an idle source is still visible downstream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const STARTUP_PING: &str = "[PING] udp_log_forwarder started";
pub const ALIVE_PING: &str = "[PING] udp_log_forwarder alive";

const LOGGER_NAME: &str = "udp_log_forwarder";

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire format of a forwarded line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: String,
    pub name: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: &str, name: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            level: level.to_string(),
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub sent: u64,
    pub failed: u64,
}

pub struct UdpLogForwarder {
    socket: UdpSocket,
    target: SocketAddr,
    name: String,
}

impl UdpLogForwarder {
    pub async fn connect(target: SocketAddr) -> Result<Self, ForwardError> {
        let local: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            target,
            name: LOGGER_NAME.to_string(),
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn send(&self, level: &str, message: &str) -> Result<(), ForwardError> {
        let record = LogRecord::new(level, &self.name, message);
        let payload = serde_json::to_vec(&record)?;
        self.socket.send_to(&payload, self.target).await?;
        Ok(())
    }

    /// Forward every line of `input` until EOF or `shutdown`, with a startup
    /// ping and a heartbeat every `ping_every`.
    ///
    /// A failed send is logged and counted; it never stops the loop.
    pub async fn forward<R>(
        &self,
        input: R,
        ping_every: Duration,
        shutdown: CancellationToken,
    ) -> Result<ForwardSummary, ForwardError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ForwardSummary::default();
        self.send_counted(STARTUP_PING, &mut summary).await;
        info!(target_addr = %self.target, "Forwarding stdin");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut lines = input.lines();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.send_counted(ALIVE_PING, &mut summary).await,
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let line = line.trim_end_matches('\r');
                        if !line.is_empty() {
                            self.send_counted(line, &mut summary).await;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!(sent = summary.sent, failed = summary.failed, "Forwarder stopped");
        Ok(summary)
    }

    async fn send_counted(&self, message: &str, summary: &mut ForwardSummary) {
        match self.send("INFO", message).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                summary.failed += 1;
                warn!(error = %e, "Failed to forward log record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv_record(socket: &UdpSocket) -> LogRecord {
        let mut buf = vec![0u8; 65535];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn forwards_lines_as_json_records() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forwarder = UdpLogForwarder::connect(receiver.local_addr().unwrap())
            .await
            .unwrap();

        let input: &[u8] = b"first\r\n\nsecond\n";
        let summary = forwarder
            .forward(input, Duration::from_secs(3600), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, ForwardSummary { sent: 3, failed: 0 });

        let ping = recv_record(&receiver).await;
        assert_eq!(ping.message, STARTUP_PING);
        assert_eq!(ping.level, "INFO");
        assert_eq!(ping.name, "udp_log_forwarder");

        assert_eq!(recv_record(&receiver).await.message, "first");
        assert_eq!(recv_record(&receiver).await.message, "second");
    }

    #[tokio::test]
    async fn record_serializes_expected_fields() {
        let record = LogRecord::new("WARNING", "app", "disk low");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["name"], "app");
        assert_eq!(value["message"], "disk low");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn cancelled_forwarder_stops_without_eof() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forwarder = UdpLogForwarder::connect(receiver.local_addr().unwrap())
            .await
            .unwrap();
        let (_writer, reader) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        token.cancel();

        let summary = forwarder
            .forward(tokio::io::BufReader::new(reader), PING_INTERVAL, token)
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
    }
}
