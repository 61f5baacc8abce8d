//! UDP ingestion.
//!
//! One datagram is one log line. Datagrams that are not valid UTF-8 are
//! dropped and counted; everything else is queued for the delivery loop.

use crate::domain::LogLine;
use crate::error::LogflowError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Synchronous callback invoked with every accepted line.
pub type LineObserver = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    dropped: AtomicU64,
}

impl ListenerStats {
    /// Lines decoded and queued.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Datagrams discarded because they could not be decoded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct Listener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    queue: mpsc::UnboundedSender<LogLine>,
    observer: Option<LineObserver>,
    stats: Arc<ListenerStats>,
    shutdown: CancellationToken,
}

impl Listener {
    /// Bind the ingestion socket. Failure here aborts startup.
    pub async fn bind(
        addr: SocketAddr,
        queue: mpsc::UnboundedSender<LogLine>,
        shutdown: CancellationToken,
    ) -> Result<Self, LogflowError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| LogflowError::Bind {
                address: addr.to_string(),
                source: e,
            })?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            queue,
            observer: None,
            stats: Arc::new(ListenerStats::default()),
            shutdown,
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: LineObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Receive until shutdown. `ready` fires once the loop is accepting datagrams.
    pub async fn run(self, ready: oneshot::Sender<SocketAddr>) {
        info!("Listening for UDP logs on {}", self.local_addr);
        // The receiver may have given up waiting; that is not our problem.
        let _ = ready.send(self.local_addr);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    debug!("UDP listener received shutdown");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            if !self.handle_datagram(&buf[..len], peer) {
                                info!("Line queue closed, stopping UDP listener");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "UDP receive error");
                        }
                    }
                }
            }
        }

        info!("UDP listener on {} stopped", self.local_addr);
    }

    /// Returns `false` once the queue consumer has gone away.
    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) -> bool {
        let line = match std::str::from_utf8(data) {
            Ok(text) => text.to_owned(),
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%peer, size = data.len(), error = %e, "Failed to decode UDP packet");
                return true;
            }
        };

        // Observers only ever see lines that made it into the queue.
        let observed = self.observer.as_ref().map(|_| line.clone());
        if self.queue.send(line).is_err() {
            return false;
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if let (Some(observer), Some(line)) = (&self.observer, observed) {
            observer(&line);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start() -> (
        SocketAddr,
        mpsc::UnboundedReceiver<LogLine>,
        Arc<ListenerStats>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), tx, token.clone())
            .await
            .unwrap();
        let stats = listener.stats();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(listener.run(ready_tx));
        let addr = ready_rx.await.unwrap();
        (addr, rx, stats, token, handle)
    }

    async fn sender() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn queues_decoded_datagrams_in_order() {
        let (addr, mut rx, stats, token, handle) = start().await;
        let client = sender().await;

        for msg in ["first", "second", "third"] {
            client.send_to(msg.as_bytes(), addr).await.unwrap();
        }
        for expected in ["first", "second", "third"] {
            let line = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(line, expected);
        }
        assert_eq!(stats.received(), 3);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drops_invalid_utf8_and_keeps_going() {
        let (addr, mut rx, stats, token, handle) = start().await;
        let client = sender().await;

        client.send_to(&[0xff, 0xfe, 0xfd], addr).await.unwrap();
        client.send_to(b"{\"msg\":\"ok\"}", addr).await.unwrap();

        let line = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(line, "{\"msg\":\"ok\"}");
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.received(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    async fn start_observed(
        tx: mpsc::UnboundedSender<LogLine>,
        token: CancellationToken,
    ) -> (SocketAddr, Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_clone = seen.clone();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), tx, token)
            .await
            .unwrap()
            .with_observer(Arc::new(move |line: &str| seen_clone.lock().push(line.to_string())));
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(listener.run(ready_tx));
        let addr = ready_rx.await.unwrap();
        (addr, seen, handle)
    }

    #[tokio::test]
    async fn observer_sees_each_line() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let (addr, seen, handle) = start_observed(tx, token.clone()).await;

        sender().await.send_to(b"observed", addr).await.unwrap();
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();

        // The observer runs right after the enqueue, on the listener task.
        let observed = timeout(Duration::from_secs(2), async {
            while seen.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(observed.is_ok());
        assert_eq!(seen.lock().as_slice(), ["observed".to_string()]);
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn observer_skips_lines_that_could_not_be_queued() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (addr, seen, handle) = start_observed(tx, CancellationToken::new()).await;
        drop(rx);

        sender().await.send_to(b"ghost", addr).await.unwrap();

        // A closed queue stops the listener without any cancellation.
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn bind_conflict_is_a_startup_error() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = Listener::bind(addr, tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(LogflowError::Bind { .. })));
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let (addr, _rx, _stats, token, handle) = start().await;
        token.cancel();
        handle.await.unwrap();

        let rebound = UdpSocket::bind(addr).await;
        assert!(rebound.is_ok());
    }
}
