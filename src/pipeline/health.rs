//! Process-wide health derived from per-sink outcomes.

use crate::error::SinkError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl SinkHealth {
    fn from_result(result: &Result<(), SinkError>) -> Self {
        if result.is_ok() {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }
}

/// Index of a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(usize);

#[derive(Debug, Clone, Serialize)]
pub struct SinkReport {
    pub name: String,
    /// Outcome of the most recent write attempt.
    pub write: SinkHealth,
    /// Outcome of the most recent independent probe, if the sink has one.
    pub probe: SinkHealth,
    pub last_error: Option<String>,
    pub last_write_at: Option<DateTime<Utc>>,
}

impl SinkReport {
    fn new(name: String) -> Self {
        Self {
            name,
            write: SinkHealth::Unknown,
            probe: SinkHealth::Unknown,
            last_error: None,
            last_write_at: None,
        }
    }

    fn is_unhealthy(&self) -> bool {
        self.write == SinkHealth::Unhealthy || self.probe == SinkHealth::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub sinks: Vec<SinkReport>,
}

/// Shared, cheaply cloneable health table.
///
/// Write outcomes are recorded only by the delivery loop; probe outcomes only
/// by the probe loop. Readers take a short read lock and never wait on sink I/O.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    sinks: Arc<RwLock<Vec<SinkReport>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>) -> SinkId {
        let mut sinks = self.sinks.write();
        sinks.push(SinkReport::new(name.into()));
        SinkId(sinks.len() - 1)
    }

    pub fn record_write(&self, id: SinkId, result: &Result<(), SinkError>) {
        let mut sinks = self.sinks.write();
        let Some(entry) = sinks.get_mut(id.0) else {
            return;
        };
        let previous = entry.write;
        entry.write = SinkHealth::from_result(result);
        entry.last_write_at = Some(Utc::now());
        match result {
            Ok(()) => entry.last_error = None,
            Err(e) => entry.last_error = Some(e.to_string()),
        }
        if previous != entry.write && previous != SinkHealth::Unknown {
            tracing::info!(
                sink = %entry.name,
                from = ?previous,
                to = ?entry.write,
                "Sink write health changed"
            );
        }
    }

    pub fn record_probe(&self, id: SinkId, result: &Result<(), SinkError>) {
        let mut sinks = self.sinks.write();
        let Some(entry) = sinks.get_mut(id.0) else {
            return;
        };
        let previous = entry.probe;
        entry.probe = SinkHealth::from_result(result);
        if let Err(e) = result {
            entry.last_error = Some(e.to_string());
        }
        if previous != entry.probe {
            tracing::debug!(sink = %entry.name, probe = ?entry.probe, "Sink probe updated");
        }
    }

    pub fn status(&self) -> HealthStatus {
        if self.sinks.read().iter().any(SinkReport::is_unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn report(&self) -> HealthReport {
        let sinks = self.sinks.read().clone();
        let status = if sinks.iter().any(SinkReport::is_unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        HealthReport { status, sinks }
    }

    pub fn sink(&self, id: SinkId) -> Option<SinkReport> {
        self.sinks.read().get(id.0).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> Result<(), SinkError> {
        Err(SinkError::Rejected("boom".into()))
    }

    #[test]
    fn no_sinks_is_healthy() {
        assert_eq!(HealthState::new().status(), HealthStatus::Healthy);
    }

    #[test]
    fn unknown_counts_as_healthy() {
        let health = HealthState::new();
        let id = health.register("file");
        assert_eq!(health.sink(id).unwrap().write, SinkHealth::Unknown);
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn one_failing_sink_makes_everything_unhealthy() {
        let health = HealthState::new();
        let file = health.register("file");
        let s3 = health.register("s3");

        health.record_write(file, &Ok(()));
        health.record_write(s3, &failure());

        assert_eq!(health.status(), HealthStatus::Unhealthy);
        let report = health.report();
        assert_eq!(report.sinks[0].write, SinkHealth::Healthy);
        assert_eq!(report.sinks[1].write, SinkHealth::Unhealthy);
        assert!(report.sinks[1].last_error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn later_success_recovers() {
        let health = HealthState::new();
        let id = health.register("s3");
        health.record_write(id, &failure());
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.record_write(id, &Ok(()));
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert!(health.sink(id).unwrap().last_error.is_none());
    }

    #[test]
    fn failed_probe_degrades_without_writes() {
        let health = HealthState::new();
        let id = health.register("s3");
        health.record_probe(id, &failure());

        let entry = health.sink(id).unwrap();
        assert_eq!(entry.write, SinkHealth::Unknown);
        assert_eq!(entry.probe, SinkHealth::Unhealthy);
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.record_probe(id, &Ok(()));
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn report_serializes_lowercase_status() {
        let health = HealthState::new();
        health.register("stdout");
        let json = serde_json::to_value(health.report()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["sinks"][0]["write"], "unknown");
    }
}
