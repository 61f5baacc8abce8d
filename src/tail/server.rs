use super::{TOO_MANY_CLIENTS, TailConfig, TailError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lines buffered per observer before it is considered too slow and dropped.
const OBSERVER_BUFFER: usize = 1024;

struct Observer {
    id: u64,
    tx: mpsc::Sender<Arc<str>>,
}

struct Shared {
    observers: Mutex<Vec<Observer>>,
    max_clients: usize,
    next_id: AtomicU64,
}

impl Shared {
    /// Register a new observer unless the limit has been reached.
    fn try_register(&self) -> Option<(u64, mpsc::Receiver<Arc<str>>)> {
        let mut observers = self.observers.lock();
        if observers.len() >= self.max_clients {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        observers.push(Observer { id, tx });
        Some((id, rx))
    }

    fn remove(&self, id: u64) -> usize {
        let mut observers = self.observers.lock();
        observers.retain(|o| o.id != id);
        observers.len()
    }
}

/// Cheap handle used by the ingestion path to push lines to observers.
#[derive(Clone)]
pub struct TailHandle {
    shared: Arc<Shared>,
}

impl TailHandle {
    /// Send `line` to every connected observer. Never blocks.
    ///
    /// An observer whose buffer is full or whose connection is gone is dropped.
    pub fn broadcast(&self, line: &str) {
        let mut observers = self.shared.observers.lock();
        if observers.is_empty() {
            return;
        }
        let line: Arc<str> = Arc::from(line);
        observers.retain(|observer| match observer.tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(observer = observer.id, "Tail client too slow, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn client_count(&self) -> usize {
        self.shared.observers.lock().len()
    }
}

pub struct TailServer {
    listener: UnixListener,
    socket_path: PathBuf,
    shared: Arc<Shared>,
}

impl TailServer {
    /// Bind the tail socket, clearing a stale socket file left by a dead process.
    pub fn bind(config: &TailConfig) -> Result<Self, TailError> {
        let path = &config.socket_path;
        if path.exists() {
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => return Err(TailError::InUse(path.clone())),
                Err(_) => {
                    debug!(path = %path.display(), "Removing stale tail socket");
                    std::fs::remove_file(path)?;
                }
            }
        }

        let listener = UnixListener::bind(path)?;
        info!(
            path = %path.display(),
            max_clients = config.max_clients,
            "Tail socket listening"
        );

        Ok(Self {
            listener,
            socket_path: path.clone(),
            shared: Arc::new(Shared {
                observers: Mutex::new(Vec::new()),
                max_clients: config.max_clients,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn handle(&self) -> TailHandle {
        TailHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept observers until shutdown, then close them and remove the socket file.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => self.admit(stream, &shutdown),
                    Err(e) => error!(error = %e, "Failed to accept tail client"),
                },
            }
        }

        // Dropping the senders ends every observer task.
        self.shared.observers.lock().clear();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Tail socket already removed");
        }
        info!("Tail server stopped");
    }

    fn admit(&self, stream: UnixStream, shutdown: &CancellationToken) {
        match self.shared.try_register() {
            Some((id, rx)) => {
                info!(
                    observer = id,
                    total = self.shared.observers.lock().len(),
                    "Tail client connected"
                );
                let shared = self.shared.clone();
                tokio::spawn(serve_observer(stream, id, rx, shared, shutdown.clone()));
            }
            None => {
                info!(max = self.shared.max_clients, "Too many tail clients, rejecting");
                tokio::spawn(reject(stream));
            }
        }
    }
}

async fn reject(mut stream: UnixStream) {
    if let Err(e) = stream.write_all(TOO_MANY_CLIENTS.as_bytes()).await {
        debug!(error = %e, "Failed to send rejection notice");
    }
    let _ = stream.shutdown().await;
}

async fn serve_observer(
    stream: UnixStream,
    id: u64,
    mut rx: mpsc::Receiver<Arc<str>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 256];
    let mut out = Vec::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,

            line = rx.recv() => {
                let Some(line) = line else { break };
                out.clear();
                out.extend_from_slice(line.as_bytes());
                out.push(b'\n');
                if let Err(e) = writer.write_all(&out).await {
                    debug!(observer = id, error = %e, "Tail write failed");
                    break;
                }
            }

            // Observers never send anything meaningful; EOF means they left.
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    let remaining = shared.remove(id);
    info!(observer = id, total = remaining, "Tail client disconnected");
}
