use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, LoginFlow};
use crate::browser::{BrowserError, PageHandle, PageSessionFactory, SessionDirs};
use crate::config::PipelineConfig;
use crate::credentials::{CredentialStore, SecretError};
use crate::navigate::{ExportNavigator, NavError, NavReport};
use crate::publish::{ObjectStore, PublishError, StorageKey};
use crate::transform::{ColumnContract, SchemaTransformer, TransformError};
use crate::watcher::{DownloadWatcher, WatchError};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("config error: {0}")]
    Config(#[from] crate::error::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("navigation failed: {0}")]
    Navigation(#[from] NavError),
    #[error("download failed: {0}")]
    Download(#[from] WatchError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("upload failed: {0}")]
    Publish(#[from] PublishError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub key: String,
    pub rows: usize,
    pub menu_skipped: bool,
    pub duration_secs: u64,
}

struct ResolvedSecrets {
    email: String,
    password: String,
    bucket: String,
}

struct Staged {
    artifact: PathBuf,
    rows: usize,
    nav: NavReport,
}

/// Sequences one export run end to end. Owns the browser session and the
/// scoped download workspace for exactly one run: the session is closed and
/// the workspace removed on every exit path, and a teardown failure never
/// masks the stage error that caused it.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn PageSessionFactory>,
    store: Arc<dyn ObjectStore>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn PageSessionFactory>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            credentials,
            sessions,
            store,
        }
    }

    pub async fn run(&self) -> PipelineResult<RunOutcome> {
        self.run_at(Utc::now()).await
    }

    /// Run with an injected start instant. The storage key and the stamped
    /// `download_datetime` column both derive from it, so a retried run with
    /// the same instant lands on the identical key.
    pub async fn run_at(&self, started_at: DateTime<Utc>) -> PipelineResult<RunOutcome> {
        let start = Instant::now();
        let stamp = started_at.with_timezone(&self.config.storage.offset());

        // Credential lookups are pre-flight: any miss aborts before the
        // browser ever launches.
        let secrets = self.resolve_secrets().await?;
        let key = StorageKey::new(
            secrets.bucket.clone(),
            self.config.storage.prefix.clone(),
            stamp,
        );
        info!(key = %key, "export run starting");

        let workspace = TempDir::new()?;
        let outcome = self
            .run_stages(&secrets, &key, stamp, workspace.path(), start)
            .await;
        match workspace.close() {
            Ok(()) => debug!("download workspace removed"),
            Err(err) => warn!(error = %err, "failed to remove download workspace"),
        }
        outcome
    }

    async fn resolve_secrets(&self) -> PipelineResult<ResolvedSecrets> {
        let names = &self.config.secrets;
        Ok(ResolvedSecrets {
            email: self.credentials.get(&names.email).await?,
            password: self.credentials.get(&names.password).await?,
            bucket: self.credentials.get(&names.bucket).await?,
        })
    }

    async fn run_stages(
        &self,
        secrets: &ResolvedSecrets,
        key: &StorageKey,
        stamp: DateTime<FixedOffset>,
        workspace: &Path,
        start: Instant,
    ) -> PipelineResult<RunOutcome> {
        let dirs = SessionDirs {
            downloads: workspace.join("downloads"),
            profile: workspace.join("profile"),
        };
        std::fs::create_dir_all(&dirs.downloads)?;
        std::fs::create_dir_all(&dirs.profile)?;

        let mut session = self.sessions.create(&dirs).await?;
        let staged = self
            .drive_browser(session.page(), &dirs.downloads, stamp, secrets)
            .await;
        if let Err(err) = session.close().await {
            warn!(error = %err, "browser session teardown failed");
        }
        let staged = staged?;

        self.store.upload(&staged.artifact, key).await?;
        info!(key = %key, rows = staged.rows, "export run complete");
        Ok(RunOutcome {
            key: key.to_string(),
            rows: staged.rows,
            menu_skipped: staged.nav.menu_skipped,
            duration_secs: start.elapsed().as_secs(),
        })
    }

    async fn drive_browser(
        &self,
        page: &mut dyn PageHandle,
        downloads: &Path,
        stamp: DateTime<FixedOffset>,
        secrets: &ResolvedSecrets,
    ) -> PipelineResult<Staged> {
        let login = LoginFlow::from_config(&self.config);
        login.run(page, &secrets.email, &secrets.password).await?;

        let navigator = ExportNavigator::from_sections(&self.config.portal, &self.config.waits);
        let nav = navigator.run(page).await?;
        if nav.menu_skipped {
            debug!("export menu was pre-expanded");
        }

        let watcher = DownloadWatcher::from_config(&self.config.download);
        let raw = watcher.wait_for_file(downloads).await?;

        // The contract is loaded at transform time, once per run.
        let contract = ColumnContract::load(&self.config.contract)?;
        let transformer = SchemaTransformer::new(contract);
        let outcome = transformer.apply(&raw, stamp)?;
        Ok(Staged {
            artifact: outcome.path,
            rows: outcome.rows,
            nav,
        })
    }
}
