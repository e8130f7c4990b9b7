use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::info;

/// Render format for the run timestamp, shared by the storage key and the
/// injected `download_datetime` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Deterministic object key, computed once from the run-start instant before
/// any network interaction. Unique per second; a retried run with the same
/// start instant produces the identical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey {
    bucket: String,
    prefix: String,
    stamp: DateTime<FixedOffset>,
}

impl StorageKey {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        stamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            stamp,
        }
    }

    pub fn stamp(&self) -> DateTime<FixedOffset> {
        self.stamp
    }

    pub fn object_path(&self) -> String {
        format!(
            "{}/{}/{}.csv",
            self.bucket,
            self.prefix,
            self.stamp.format(TIMESTAMP_FORMAT)
        )
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_path())
    }
}

/// Blob-upload sink. The pipeline hands the finished artifact over and keeps
/// no further ownership of it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, local: &Path, key: &StorageKey) -> PublishResult<()>;
}

/// PUTs the artifact to `{endpoint}/{key}` with an optional bearer token.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, local: &Path, key: &StorageKey) -> PublishResult<()> {
        let body = tokio::fs::read(local).await?;
        let url = format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            key.object_path()
        );
        let mut request = self.client.put(url).body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        info!(key = %key, "artifact uploaded");
        Ok(())
    }
}

/// Copies the artifact under a local root, mirroring the key layout. Used by
/// tests and local dry runs.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn target_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.object_path())
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn upload(&self, local: &Path, key: &StorageKey) -> PublishResult<()> {
        let target = self.target_for(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        info!(key = %key, target = %target.display(), "artifact stored locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(-5 * 3600).unwrap()
    }

    #[test]
    fn key_renders_bucket_prefix_and_stamp() {
        let stamp = offset().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = StorageKey::new("exports", "daily_raw", stamp);
        assert_eq!(key.object_path(), "exports/daily_raw/2024-01-01 00:00:00.csv");
    }

    #[test]
    fn distinct_seconds_produce_distinct_keys() {
        let first = offset().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = offset().with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let a = StorageKey::new("exports", "daily_raw", first);
        let b = StorageKey::new("exports", "daily_raw", second);
        assert_ne!(a.object_path(), b.object_path());
    }

    #[test]
    fn same_instant_produces_identical_key() {
        let stamp = offset().with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let a = StorageKey::new("exports", "daily_raw", stamp);
        let b = StorageKey::new("exports", "daily_raw", stamp);
        assert_eq!(a, b);
        assert_eq!(a.object_path(), b.object_path());
    }

    #[tokio::test]
    async fn dir_store_mirrors_key_layout() {
        let artifact_dir = tempdir().unwrap();
        let artifact = artifact_dir.path().join("modified_export.csv");
        std::fs::write(&artifact, "A\n1\n").unwrap();

        let root = tempdir().unwrap();
        let store = DirObjectStore::new(root.path());
        let stamp = offset().with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let key = StorageKey::new("exports", "daily_raw", stamp);
        store.upload(&artifact, &key).await.unwrap();

        let stored = store.target_for(&key);
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "A\n1\n");
    }
}
