//! Wires the listener, delivery loop, health endpoint, probes and tail socket
//! together under one shutdown token.

use super::PipelineConfig;
use super::accumulator::BatchAccumulator;
use super::delivery::{DeliveryLoop, RegisteredSink};
use super::health::HealthState;
use super::listener::{LineObserver, Listener, ListenerStats};
use crate::app::router::health_router;
use crate::app::server::serve_health;
use crate::error::LogflowError;
use crate::port::Sink;
use crate::tail::{TailHandle, TailServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: PipelineConfig,
    sinks: Vec<Arc<dyn Sink>>,
    observer: Option<LineObserver>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            config,
            sinks,
            observer: None,
        }
    }

    /// Invoke `observer` synchronously with every ingested line.
    #[must_use]
    pub fn with_observer(mut self, observer: LineObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Bind every endpoint and spawn the tasks.
    ///
    /// Returns once the listener is accepting datagrams. Any bind failure is
    /// returned before anything is left running.
    pub async fn start(self) -> Result<RunningPipeline, LogflowError> {
        let shutdown = CancellationToken::new();
        let health = HealthState::new();
        let sinks = RegisteredSink::register_all(self.sinks, &health);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let mut listener =
            Listener::bind(self.config.listen_addr, queue_tx, shutdown.child_token()).await?;
        let stats = listener.stats();

        let health_listener = match self.config.health_addr {
            Some(addr) => Some(tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                LogflowError::Bind {
                    address: addr.to_string(),
                    source: e,
                }
            })?),
            None => None,
        };
        let health_addr = match &health_listener {
            Some(l) => Some(l.local_addr()?),
            None => None,
        };

        // Bound last: the socket file must not outlive a failed start.
        let tail = match &self.config.tail {
            Some(tail_config) => Some(TailServer::bind(tail_config)?),
            None => None,
        };
        let tail_handle = tail.as_ref().map(TailServer::handle);
        if let Some(observer) = compose_observer(self.observer, tail_handle.clone()) {
            listener = listener.with_observer(observer);
        }

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let (ready_tx, ready_rx) = oneshot::channel();
        tasks.push(("listener", tokio::spawn(listener.run(ready_tx))));
        let ingest_addr = match ready_rx.await {
            Ok(addr) => addr,
            Err(_) => {
                shutdown.cancel();
                if let Some(server) = &tail {
                    let _ = std::fs::remove_file(server.socket_path());
                }
                return Err(LogflowError::NotReady);
            }
        };

        if let Some(server) = tail {
            tasks.push(("tail", tokio::spawn(server.run(shutdown.child_token()))));
        }

        if let Some(interval) = self.config.probe_interval {
            let probes = probe_loop(sinks.clone(), health.clone(), interval, shutdown.child_token());
            tasks.push(("probe", tokio::spawn(probes)));
        }

        let delivery = DeliveryLoop::new(
            queue_rx,
            BatchAccumulator::new(self.config.batch),
            sinks,
            health.clone(),
            self.config.delivery,
            shutdown.child_token(),
        );
        tasks.push(("delivery", tokio::spawn(delivery.run())));

        if let Some(listener) = health_listener {
            let app = health_router(health.clone());
            let token = shutdown.child_token();
            tasks.push((
                "health",
                tokio::spawn(async move {
                    if let Err(e) = serve_health(listener, app, token).await {
                        error!("Health server failed: {}", e);
                    }
                }),
            ));
        }

        info!(%ingest_addr, health = ?health_addr, "Pipeline started");

        Ok(RunningPipeline {
            ingest_addr,
            health_addr,
            health,
            stats,
            tail: tail_handle,
            shutdown,
            shutdown_grace: self.config.shutdown_grace,
            tasks,
        })
    }
}

fn compose_observer(
    observer: Option<LineObserver>,
    tail: Option<TailHandle>,
) -> Option<LineObserver> {
    match (observer, tail) {
        (None, None) => None,
        (Some(observer), None) => Some(observer),
        (None, Some(tail)) => Some(Arc::new(move |line: &str| tail.broadcast(line))),
        (Some(observer), Some(tail)) => Some(Arc::new(move |line: &str| {
            tail.broadcast(line);
            observer(line);
        })),
    }
}

async fn probe_loop(
    sinks: Vec<RegisteredSink>,
    health: HealthState,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for registered in &sinks {
                    let Some(probe) = registered.sink.probe() else {
                        continue;
                    };
                    let result = tokio::select! {
                        () = shutdown.cancelled() => return,
                        result = probe => result,
                    };
                    if let Err(e) = &result {
                        warn!(sink = registered.sink.name(), error = %e, "Sink probe failed");
                    }
                    health.record_probe(registered.id, &result);
                }
            }
        }
    }
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    ingest_addr: SocketAddr,
    health_addr: Option<SocketAddr>,
    health: HealthState,
    stats: Arc<ListenerStats>,
    tail: Option<TailHandle>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl RunningPipeline {
    /// Address the UDP listener is bound to.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn listener_stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn tail(&self) -> Option<&TailHandle> {
        self.tail.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every task and wait for them within the grace period.
    ///
    /// Lines still buffered in the accumulator are not flushed.
    pub async fn shutdown(self) -> Result<(), LogflowError> {
        info!("Shutting down pipeline");
        self.shutdown.cancel();

        let deadline = Instant::now() + self.shutdown_grace;
        let mut first_timeout = None;
        for (task, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task, "Pipeline task failed: {}", e),
                Err(_) => {
                    warn!(task, "Task did not stop in time, aborting");
                    handle.abort();
                    first_timeout.get_or_insert(task);
                }
            }
        }

        match first_timeout {
            Some(task) => Err(LogflowError::ShutdownTimeout { task }),
            None => {
                info!("Pipeline shutdown complete");
                Ok(())
            }
        }
    }
}
