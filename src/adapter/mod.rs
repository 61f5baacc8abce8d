pub mod file;
pub mod object_storage;
pub mod stdout;

pub use file::FileSink;
pub use object_storage::{ObjectStorageConfig, ObjectStorageSink};
pub use stdout::StdoutSink;
