//! Sink trait for batch delivery.
//!
//! The delivery loop only knows about this trait, so new destinations plug in
//! without touching the loop itself.

use crate::domain::Batch;
use crate::error::SinkError;
use std::future::Future;
use std::pin::Pin;

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// A destination for flushed batches.
///
/// This trait is dyn-compatible by using boxed futures instead of `impl Future`.
/// The batch is lent for the duration of the call; implementations that queue
/// work internally must clone what they keep.
pub trait Sink: Send + Sync {
    /// Stable name used for health reporting and logs.
    fn name(&self) -> &str;

    /// Deliver one batch. An empty batch must resolve to `Ok(())` without side effects.
    fn write_batch<'a>(&'a self, batch: &'a Batch) -> SinkFuture<'a>;

    /// Optional reachability check that runs independently of writes.
    fn probe(&self) -> Option<SinkFuture<'_>> {
        None
    }
}
