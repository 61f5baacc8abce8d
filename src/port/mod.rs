pub mod sink;

pub use sink::{Sink, SinkFuture};
