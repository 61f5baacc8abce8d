use crate::domain::Batch;
use crate::error::SinkError;
use crate::port::{Sink, SinkFuture};
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Echoes every line of a batch to standard output.
pub struct StdoutSink<W = Stdout> {
    out: Mutex<W>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Write to something other than the real stdout.
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W> Sink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "stdout"
    }

    fn write_batch<'a>(&'a self, batch: &'a Batch) -> SinkFuture<'a> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let mut buf = Vec::with_capacity(batch.byte_size() + batch.len());
            for line in batch.lines() {
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
            }

            // Held only while writing so lines of one batch stay together.
            let mut out = self.out.lock().await;
            out.write_all(&buf)
                .await
                .map_err(|e| SinkError::io(PathBuf::from("<stdout>"), e))?;
            out.flush()
                .await
                .map_err(|e| SinkError::io(PathBuf::from("<stdout>"), e))
        })
    }
}
