pub mod batch;

pub use batch::{Batch, FlushTrigger, LogLine};
