//! File-based metrics source.
//!
//! Reads an exposition payload from disk on every fetch. Useful for replaying
//! a saved `/metrics` dump, or for a sidecar that writes one periodically.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::MetricsSource;
use crate::error::ScrapeError;

/// A source that reads exposition text from a file.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    description: String,
}

impl FileSource {
    /// Create a new file source for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self { path, description }
    }

    /// Returns the path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSource for FileSource {
    async fn fetch(&self) -> Result<String, ScrapeError> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn new_records_path_and_description() {
        let source = FileSource::new("/tmp/metrics.txt");
        assert_eq!(source.path(), Path::new("/tmp/metrics.txt"));
        assert_eq!(source.description(), "file: /tmp/metrics.txt");
    }

    #[tokio::test]
    async fn reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "go_app_cpu_usage_percent 12.5").unwrap();

        let source = FileSource::new(file.path());
        let text = source.fetch().await.unwrap();

        assert_eq!(text.trim(), "go_app_cpu_usage_percent 12.5");
    }

    #[tokio::test]
    async fn sees_rewrites() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "a 1\n").unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.fetch().await.unwrap(), "a 1\n");

        std::fs::write(file.path(), "a 2\n").unwrap();
        assert_eq!(source.fetch().await.unwrap(), "a 2\n");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let source = FileSource::new("/nonexistent/path/metrics.txt");

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Io(_)));
        assert!(err.to_string().contains("Read error"));
    }
}
