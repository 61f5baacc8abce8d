// Write each flushed batch to its own newline-delimited file.
// Files are never appended to or rotated: one batch, one file. Retention is
// left to whatever cleans up the target directory.

use crate::domain::Batch;
use crate::error::SinkError;
use crate::port::{Sink, SinkFuture};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_PREFIX: &str = "logflow";
const DEFAULT_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone)]
pub struct FileSink {
    name: String,
    directory: PathBuf,
    prefix: String,
    extension: String,
}

impl FileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            name: "file".to_string(),
            directory: directory.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_file_pattern(mut self, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.extension = extension.into();
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `<prefix>-<UTC timestamp>-<random>.<ext>`
    fn next_file_name(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}.{}",
            self.prefix,
            timestamp,
            &suffix[..8],
            self.extension
        )
    }

    async fn write_file(&self, batch: &Batch) -> Result<PathBuf, SinkError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| SinkError::io(&self.directory, e))?;

        let path = self.directory.join(self.next_file_name());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::io(&path, e))?;

        let mut contents = String::with_capacity(batch.byte_size() + batch.len());
        for line in batch.lines() {
            contents.push_str(line.trim_end_matches(['\r', '\n']));
            contents.push('\n');
        }

        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| SinkError::io(&path, e))?;
        file.sync_data().await.map_err(|e| SinkError::io(&path, e))?;
        Ok(path)
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_batch<'a>(&'a self, batch: &'a Batch) -> SinkFuture<'a> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let path = self.write_file(batch).await?;
            debug!(path = %path.display(), lines = batch.len(), "Wrote batch file");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FlushTrigger;
    use tempfile::TempDir;

    fn batch(lines: &[&str]) -> Batch {
        Batch::new(lines.iter().map(|l| l.to_string()).collect(), FlushTrigger::Size)
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn writes_one_file_per_batch() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path());

        sink.write_batch(&batch(&["{\"n\":1}", "{\"n\":2}"])).await.unwrap();
        sink.write_batch(&batch(&["{\"n\":3}"])).await.unwrap();

        let files = files_in(temp_dir.path());
        assert_eq!(files.len(), 2);

        let mut contents: Vec<String> = files
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, ["{\"n\":1}\n{\"n\":2}\n", "{\"n\":3}\n"]);
    }

    #[tokio::test]
    async fn file_names_follow_the_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path()).with_file_pattern("app", "log");

        sink.write_batch(&batch(&["x"])).await.unwrap();

        let files = files_in(temp_dir.path());
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("app-"), "{name}");
        assert!(name.ends_with(".log"), "{name}");
    }

    #[tokio::test]
    async fn strips_existing_line_endings() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path());

        sink.write_batch(&batch(&["crlf\r\n", "lf\n", "bare"])).await.unwrap();

        let files = files_in(temp_dir.path());
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(content, "crlf\nlf\nbare\n");
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let sink = FileSink::new(&nested);

        sink.write_batch(&batch(&["x"])).await.unwrap();
        assert_eq!(files_in(&nested).len(), 1);
    }

    #[tokio::test]
    async fn unusable_directory_is_a_write_error() {
        let temp_dir = TempDir::new().unwrap();
        let not_a_dir = temp_dir.path().join("occupied");
        std::fs::write(&not_a_dir, b"file in the way").unwrap();
        let sink = FileSink::new(&not_a_dir);

        let err = sink.write_batch(&batch(&["x"])).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }), "{err}");
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path().join("never"));

        sink.write_batch(&batch(&[])).await.unwrap();
        assert!(!temp_dir.path().join("never").exists());
    }
}
