pub mod accumulator;
pub mod delivery;
pub mod health;
pub mod listener;
pub mod orchestrator;

use crate::config::Settings;
use crate::error::LogflowError;
use crate::tail::TailConfig;
use accumulator::BatchConfig;
use delivery::DeliveryOptions;
use std::net::SocketAddr;
use std::time::Duration;

pub use accumulator::BatchAccumulator;
pub use delivery::{DeliveryLoop, DeliveryReport};
pub use health::{HealthReport, HealthState, HealthStatus, SinkHealth};
pub use listener::{LineObserver, Listener, ListenerStats};
pub use orchestrator::{Pipeline, RunningPipeline};

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Immutable per-run configuration handed to every pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub listen_addr: SocketAddr,
    pub batch: BatchConfig,
    pub delivery: DeliveryOptions,
    /// `None` disables the HTTP health endpoint.
    pub health_addr: Option<SocketAddr>,
    /// `None` disables the background sink probes.
    pub probe_interval: Option<Duration>,
    pub shutdown_grace: Duration,
    /// `None` disables the tail socket.
    pub tail: Option<TailConfig>,
}

impl PipelineConfig {
    /// Ingestion only: no health endpoint, no probes, no tail socket.
    pub fn new(listen_addr: SocketAddr, batch: BatchConfig) -> Self {
        Self {
            listen_addr,
            batch,
            delivery: DeliveryOptions {
                poll_interval: poll_interval_for(batch.max_age),
                ..DeliveryOptions::default()
            },
            health_addr: None,
            probe_interval: None,
            shutdown_grace: Duration::from_secs(5),
            tail: None,
        }
    }

    #[must_use]
    pub fn with_health_addr(mut self, addr: SocketAddr) -> Self {
        self.health_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_tail(mut self, tail: TailConfig) -> Self {
        self.tail = Some(tail);
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, LogflowError> {
        let batch = BatchConfig {
            max_bytes: settings.batch_size_bytes,
            max_age: settings.batch_interval()?,
        };
        let mut config = Self::new(
            SocketAddr::new(settings.listen_ip, settings.listen_port),
            batch,
        )
        .with_health_addr(SocketAddr::new(settings.health_ip, settings.health_port));

        config.delivery.sink_timeout = Duration::from_secs(settings.sink_timeout_secs);
        config.shutdown_grace = Duration::from_secs(settings.shutdown_grace_secs);
        if settings.probe_interval_secs > 0 {
            config.probe_interval = Some(Duration::from_secs(settings.probe_interval_secs));
        }
        if settings.tail_enabled {
            config.tail = Some(TailConfig {
                socket_path: settings.tail_socket.clone(),
                max_clients: settings.max_tail_clients,
            });
        }
        Ok(config)
    }
}

/// The loop must wake at least this often for the time trigger to be timely.
pub fn poll_interval_for(max_age: Duration) -> Duration {
    max_age.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}
