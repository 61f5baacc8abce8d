//! Queue draining, batch flushing and sink fan-out.

use crate::domain::{Batch, LogLine};
use crate::error::SinkError;
use crate::pipeline::accumulator::BatchAccumulator;
use crate::pipeline::health::{HealthState, SinkId};
use crate::port::Sink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct DeliveryOptions {
    /// Longest the loop waits for a line before re-checking the time trigger.
    pub poll_interval: Duration,
    /// Upper bound on a single `write_batch` call.
    pub sink_timeout: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            sink_timeout: Duration::from_secs(30),
        }
    }
}

/// A sink together with its slot in the health table.
#[derive(Clone)]
pub struct RegisteredSink {
    pub id: SinkId,
    pub sink: Arc<dyn Sink>,
}

impl RegisteredSink {
    /// Register every sink with `health`, preserving order.
    pub fn register_all(sinks: Vec<Arc<dyn Sink>>, health: &HealthState) -> Vec<Self> {
        sinks
            .into_iter()
            .map(|sink| Self {
                id: health.register(sink.name()),
                sink,
            })
            .collect()
    }
}

/// Result of fanning one batch out to every sink.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failures: Vec<(String, SinkError)>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct DeliveryLoop {
    queue: mpsc::UnboundedReceiver<LogLine>,
    accumulator: BatchAccumulator,
    sinks: Vec<RegisteredSink>,
    health: HealthState,
    options: DeliveryOptions,
    shutdown: CancellationToken,
}

impl DeliveryLoop {
    pub fn new(
        queue: mpsc::UnboundedReceiver<LogLine>,
        accumulator: BatchAccumulator,
        sinks: Vec<RegisteredSink>,
        health: HealthState,
        options: DeliveryOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            accumulator,
            sinks,
            health,
            options,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let config = *self.accumulator.config();
        info!(
            max_bytes = config.max_bytes,
            max_age_ms = config.max_age.as_millis() as u64,
            sinks = self.sinks.len(),
            "Delivery loop started"
        );

        let start = Instant::now() + self.options.poll_interval;
        let mut ticker = interval_at(start, self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flushed = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                line = self.queue.recv() => match line {
                    Some(line) => self.accumulator.push(line, Instant::now()),
                    None => {
                        info!("Line queue closed");
                        break;
                    }
                },

                _ = ticker.tick() => self.accumulator.poll(Instant::now()),
            };

            if let Some(batch) = flushed {
                self.deliver(&batch).await;
            }
        }

        let dropped = self.accumulator.discard();
        if dropped > 0 {
            warn!(lines = dropped, "Dropping unflushed lines at shutdown");
        }
        info!("Delivery loop stopped");
    }

    /// Hand `batch` to every sink in order. One sink failing never skips the rest.
    pub async fn deliver(&self, batch: &Batch) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if batch.is_empty() {
            return report;
        }

        debug!(
            lines = batch.len(),
            bytes = batch.byte_size(),
            trigger = ?batch.trigger(),
            "Flushing batch"
        );

        for registered in &self.sinks {
            report.attempted += 1;
            let name = registered.sink.name();
            let result = match timeout(
                self.options.sink_timeout,
                registered.sink.write_batch(batch),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.options.sink_timeout)),
            };

            self.health.record_write(registered.id, &result);
            match result {
                Ok(()) => debug!(sink = name, lines = batch.len(), "Batch written"),
                Err(e) => {
                    error!(sink = name, lines = batch.len(), error = %e, "Failed to write batch");
                    report.failures.push((name.to_string(), e));
                }
            }
        }

        if !report.is_success() {
            warn!(
                failed = report.failures.len(),
                attempted = report.attempted,
                "Batch delivery incomplete"
            );
        }
        report
    }
}
