use crate::adapter::{FileSink, ObjectStorageSink, StdoutSink};
use crate::config::{Settings, SinkKind};
use crate::error::LogflowError;
use crate::port::Sink;
use std::sync::Arc;
use tracing::info;

/// Build the configured sinks, in configuration order.
///
/// Duplicate entries are collapsed so a sink never receives a batch twice.
pub fn build_sinks(settings: &Settings) -> Result<Vec<Arc<dyn Sink>>, LogflowError> {
    let mut kinds: Vec<SinkKind> = Vec::with_capacity(settings.sinks.len());
    for kind in &settings.sinks {
        if !kinds.contains(kind) {
            kinds.push(*kind);
        }
    }

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let sink: Arc<dyn Sink> = match kind {
            SinkKind::Stdout => Arc::new(StdoutSink::new()),
            SinkKind::File => Arc::new(FileSink::new(settings.disk_sink_dir.clone())),
            SinkKind::S3 => Arc::new(
                ObjectStorageSink::new(settings.object_storage())
                    .map_err(|e| LogflowError::Config(e.to_string()))?,
            ),
        };
        info!(sink = sink.name(), "Configured sink");
        sinks.push(sink);
    }
    Ok(sinks)
}
