use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::DownloadSection;
use crate::wait::await_condition;

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no .{extension} file appeared in {dir} within {attempts} polls")]
    DownloadTimeout {
        dir: PathBuf,
        extension: String,
        attempts: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Polls the download directory until a file with the expected extension
/// materializes. The portal writes the export at an unknown delay and offers
/// no completion signal, so bounded polling is the only suspension available.
#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    extension: String,
    attempts: usize,
    interval: Duration,
}

impl DownloadWatcher {
    pub fn new(extension: impl Into<String>, attempts: usize, interval: Duration) -> Self {
        Self {
            extension: extension.into(),
            attempts,
            interval,
        }
    }

    pub fn from_config(config: &DownloadSection) -> Self {
        Self::new(
            config.extension.clone(),
            config.poll_attempts,
            Duration::from_millis(config.poll_interval_ms),
        )
    }

    /// First matching file in lexical order. Selection is deterministic but
    /// deliberately not newest-first: each run watches its own private
    /// directory, so multiple matches do not occur in practice.
    pub async fn wait_for_file(&self, dir: &Path) -> WatchResult<PathBuf> {
        debug!(
            dir = %dir.display(),
            extension = %self.extension,
            attempts = self.attempts,
            "watching for export file"
        );
        let extension = self.extension.as_str();
        let found = await_condition(self.attempts, self.interval, move || {
            let dir = dir;
            async move { scan(dir, extension) }
        })
        .await?;
        match found {
            Some(path) => {
                info!(file = %path.display(), "export file materialized");
                Ok(path)
            }
            None => Err(WatchError::DownloadTimeout {
                dir: dir.to_path_buf(),
                extension: self.extension.clone(),
                attempts: self.attempts,
            }),
        }
    }
}

fn scan(dir: &Path, extension: &str) -> io::Result<Option<PathBuf>> {
    let mut matches: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn watcher(attempts: usize) -> DownloadWatcher {
        DownloadWatcher::new("csv", attempts, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn finds_file_that_appears_mid_watch() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("export.csv");
        let pending = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fs::write(&pending, "A,B\n1,2\n").unwrap();
        });
        let found = watcher(100).wait_for_file(dir.path()).await.unwrap();
        assert_eq!(found, target);
    }

    #[tokio::test]
    async fn empty_directory_times_out() {
        let dir = tempdir().unwrap();
        let err = watcher(3).wait_for_file(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            WatchError::DownloadTimeout { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn partial_downloads_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("export.csv.crdownload"), "partial").unwrap();
        let err = watcher(2).wait_for_file(dir.path()).await.unwrap_err();
        assert!(matches!(err, WatchError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn first_lexical_match_wins() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "").unwrap();
        fs::write(dir.path().join("a.csv"), "").unwrap();
        let found = watcher(2).wait_for_file(dir.path()).await.unwrap();
        assert_eq!(found, dir.path().join("a.csv"));
    }

    #[tokio::test]
    async fn missing_directory_propagates_io_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        let err = watcher(2).wait_for_file(&gone).await.unwrap_err();
        assert!(matches!(err, WatchError::Io(_)));
    }
}
