//! Shared test support utilities
//!
//! Provides `CaptureSink`, an in-memory `Sink` for unit and integration tests.

use crate::domain::{Batch, LogLine};
use crate::error::SinkError;
use crate::port::{Sink, SinkFuture};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Sink that records a copy of every batch it receives.
pub struct CaptureSink {
    name: String,
    batches: Mutex<Vec<Vec<LogLine>>>,
    write_calls: AtomicUsize,
    should_fail: AtomicBool,
    notify: Notify,
}

impl CaptureSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// While set, every write is counted but rejected.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Batches accepted so far, in delivery order.
    pub fn batches(&self) -> Vec<Vec<LogLine>> {
        self.batches.lock().clone()
    }

    /// Every line accepted so far, flattened.
    pub fn lines(&self) -> Vec<LogLine> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `write_batch` calls, including rejected ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` batches were accepted. Returns `false` on timeout.
    pub async fn wait_for_batches(&self, count: usize, within: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.batches.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(within, wait).await.is_ok()
    }
}

impl Sink for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_batch<'a>(&'a self, batch: &'a Batch) -> SinkFuture<'a> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(SinkError::Rejected("capture sink set to fail".to_string()));
            }
            self.batches.lock().push(batch.lines().to_vec());
            self.notify.notify_waiters();
            Ok(())
        })
    }
}
