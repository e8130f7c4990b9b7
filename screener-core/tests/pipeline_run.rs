use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use screener_core::auth::AuthError;
use screener_core::browser::{
    BrowserError, BrowserResult, PageHandle, PageSession, PageSessionFactory, Selector,
    SessionDirs,
};
use screener_core::config::{
    ChromiumSection, ContractSection, DownloadSection, PipelineConfig, PortalSection,
    SecretsSection, StorageSection, WaitSection,
};
use screener_core::credentials::StaticCredentialStore;
use screener_core::navigate::NavError;
use screener_core::pipeline::{PipelineError, PipelineOrchestrator};
use screener_core::publish::{ObjectStore, PublishError, PublishResult, StorageKey};
use screener_core::transform::TransformError;
use screener_core::watcher::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Happy,
    MissingLoginField,
    MissingViewMarker,
    NoDownload,
    BadSchema,
}

#[derive(Default)]
struct Tracking {
    creates: usize,
    closes: usize,
    downloads_dir: Option<PathBuf>,
}

struct ScriptedPage {
    behavior: Behavior,
    downloads: PathBuf,
}

impl ScriptedPage {
    fn visible(&self, target: &Selector) -> bool {
        let name = target.to_string();
        match self.behavior {
            Behavior::MissingLoginField => name != "field `email`",
            Behavior::MissingViewMarker => !name.contains("ML View"),
            _ => true,
        }
    }
}

#[async_trait(?Send)]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, _url: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn wait_for_presence(
        &mut self,
        target: &Selector,
        _timeout: Duration,
    ) -> BrowserResult<()> {
        if self.visible(target) {
            Ok(())
        } else {
            Err(BrowserError::Timeout(target.to_string()))
        }
    }

    async fn wait_for_clickable(
        &mut self,
        target: &Selector,
        _timeout: Duration,
    ) -> BrowserResult<()> {
        if self.visible(target) {
            Ok(())
        } else {
            Err(BrowserError::Timeout(target.to_string()))
        }
    }

    async fn click(&mut self, target: &Selector) -> BrowserResult<()> {
        if target.to_string().contains("Download to CSV") {
            let payload = match self.behavior {
                Behavior::BadSchema => Some("A\n1\n"),
                Behavior::NoDownload => None,
                _ => Some("A,B\n1,50%\n2,25%\n"),
            };
            if let Some(payload) = payload {
                std::fs::write(self.downloads.join("export.csv"), payload)?;
            }
        }
        Ok(())
    }

    async fn type_text(&mut self, _target: &Selector, _text: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn read_text(&mut self, _target: &Selector) -> BrowserResult<Option<String>> {
        Ok(Some("Download to CSV".to_string()))
    }
}

struct ScriptedSession {
    page: ScriptedPage,
    tracking: Arc<Mutex<Tracking>>,
}

#[async_trait(?Send)]
impl PageSession for ScriptedSession {
    fn page(&mut self) -> &mut dyn PageHandle {
        &mut self.page
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.tracking.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct ScriptedFactory {
    behavior: Behavior,
    tracking: Arc<Mutex<Tracking>>,
}

impl ScriptedFactory {
    fn new(behavior: Behavior) -> (Self, Arc<Mutex<Tracking>>) {
        let tracking = Arc::new(Mutex::new(Tracking::default()));
        (
            Self {
                behavior,
                tracking: Arc::clone(&tracking),
            },
            tracking,
        )
    }
}

#[async_trait(?Send)]
impl PageSessionFactory for ScriptedFactory {
    async fn create(&self, dirs: &SessionDirs) -> BrowserResult<Box<dyn PageSession>> {
        {
            let mut tracking = self.tracking.lock().unwrap();
            tracking.creates += 1;
            tracking.downloads_dir = Some(dirs.downloads.clone());
        }
        Ok(Box::new(ScriptedSession {
            page: ScriptedPage {
                behavior: self.behavior,
                downloads: dirs.downloads.clone(),
            },
            tracking: Arc::clone(&self.tracking),
        }))
    }
}

#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload(&self, local: &Path, key: &StorageKey) -> PublishResult<()> {
        let content = std::fs::read_to_string(local)?;
        self.uploads
            .lock()
            .unwrap()
            .push((key.object_path(), content));
        Ok(())
    }
}

struct FailingStore;

#[async_trait]
impl ObjectStore for FailingStore {
    async fn upload(&self, _local: &Path, _key: &StorageKey) -> PublishResult<()> {
        Err(PublishError::Io(std::io::Error::other(
            "injected upload failure",
        )))
    }
}

fn test_config(contract_dir: &Path) -> PipelineConfig {
    std::fs::write(
        contract_dir.join("column_types.json"),
        r#"{"A": "int", "B": "float"}"#,
    )
    .unwrap();
    std::fs::write(contract_dir.join("percent_columns.json"), r#"["B"]"#).unwrap();

    PipelineConfig {
        portal: PortalSection {
            login_url: "https://portal.example/login/".to_string(),
            screener_url: "https://portal.example/screener/".to_string(),
            email_field: "email".to_string(),
            password_field: "password".to_string(),
            login_button_label: "Log In".to_string(),
            view_marker_label: "ML View".to_string(),
            menu_trigger_label: "Download".to_string(),
            export_action_label: "Download to CSV".to_string(),
            menu_container_markers: vec!["[role='menu']".to_string()],
        },
        chromium: ChromiumSection {
            executable_path: "/usr/bin/chromium".to_string(),
            headless: true,
            sandbox: false,
            disable_gpu: true,
            disable_dev_shm: true,
        },
        secrets: SecretsSection {
            env_prefix: "UNUSED_".to_string(),
            email: "email".to_string(),
            password: "password".to_string(),
            bucket: "bucket-name".to_string(),
        },
        waits: WaitSection {
            page_poll_ms: 1,
            login_field_timeout_s: 1,
            form_settle_ms: 0,
            session_settle_ms: 0,
            marker_timeout_s: 1,
            view_click_timeout_s: 1,
            view_settle_ms: 0,
            menu_trigger_timeout_s: 1,
            menu_container_timeout_s: 1,
            menu_settle_ms: 0,
            export_timeout_s: 1,
        },
        download: DownloadSection {
            extension: "csv".to_string(),
            poll_attempts: 5,
            poll_interval_ms: 5,
        },
        contract: ContractSection {
            column_types: contract_dir.join("column_types.json"),
            percent_columns: contract_dir.join("percent_columns.json"),
        },
        storage: StorageSection {
            prefix: "daily_raw".to_string(),
            utc_offset_hours: -5,
            endpoint: None,
            auth_token_secret: None,
            local_root: None,
        },
    }
}

fn credentials() -> Arc<StaticCredentialStore> {
    Arc::new(StaticCredentialStore::new([
        ("email".to_string(), "user@example.com".to_string()),
        ("password".to_string(), "hunter2".to_string()),
        ("bucket-name".to_string(), "exports".to_string()),
    ]))
}

fn build_orchestrator(
    behavior: Behavior,
    contract_dir: &Path,
    store: Arc<dyn ObjectStore>,
) -> (PipelineOrchestrator, Arc<Mutex<Tracking>>) {
    let (factory, tracking) = ScriptedFactory::new(behavior);
    let orchestrator = PipelineOrchestrator::new(
        test_config(contract_dir),
        credentials(),
        Arc::new(factory),
        store,
    );
    (orchestrator, tracking)
}

fn start_instant() -> chrono::DateTime<Utc> {
    // 05:00 UTC renders as midnight in the pipeline's UTC-5 offset.
    Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap()
}

fn assert_cleaned_up(tracking: &Arc<Mutex<Tracking>>) {
    let tracking = tracking.lock().unwrap();
    assert_eq!(tracking.creates, 1, "session should be created once");
    assert_eq!(tracking.closes, 1, "session should be closed exactly once");
    let downloads = tracking.downloads_dir.as_ref().expect("factory saw dirs");
    assert!(
        !downloads.exists(),
        "download workspace should be removed: {}",
        downloads.display()
    );
}

#[tokio::test]
async fn happy_path_uploads_transformed_artifact() {
    let contract_dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::default());
    let (orchestrator, tracking) =
        build_orchestrator(Behavior::Happy, contract_dir.path(), store.clone());

    let outcome = orchestrator.run_at(start_instant()).await.unwrap();
    assert_eq!(outcome.key, "exports/daily_raw/2024-01-01 00:00:00.csv");
    assert_eq!(outcome.rows, 2);
    assert!(!outcome.menu_skipped);

    let uploads = store.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "exports/daily_raw/2024-01-01 00:00:00.csv");
    assert_eq!(
        uploads[0].1,
        "A,B,download_datetime\n\
         1,0.5,2024-01-01 00:00:00\n\
         2,0.25,2024-01-01 00:00:00\n"
    );
    drop(uploads);
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn missing_secret_aborts_before_browser_launch() {
    let contract_dir = TempDir::new().unwrap();
    let (factory, tracking) = ScriptedFactory::new(Behavior::Happy);
    let orchestrator = PipelineOrchestrator::new(
        test_config(contract_dir.path()),
        Arc::new(StaticCredentialStore::new([(
            "email".to_string(),
            "user@example.com".to_string(),
        )])),
        Arc::new(factory),
        Arc::new(RecordingStore::default()),
    );

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Secret(_)));
    assert_eq!(tracking.lock().unwrap().creates, 0);
}

#[tokio::test]
async fn auth_failure_still_tears_down() {
    let contract_dir = TempDir::new().unwrap();
    let (orchestrator, tracking) = build_orchestrator(
        Behavior::MissingLoginField,
        contract_dir.path(),
        Arc::new(RecordingStore::default()),
    );

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Auth(AuthError::ElementNotFound(_))
    ));
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn navigation_timeout_still_tears_down() {
    let contract_dir = TempDir::new().unwrap();
    let (orchestrator, tracking) = build_orchestrator(
        Behavior::MissingViewMarker,
        contract_dir.path(),
        Arc::new(RecordingStore::default()),
    );

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Navigation(NavError::Timeout { .. })
    ));
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn download_timeout_still_tears_down() {
    let contract_dir = TempDir::new().unwrap();
    let (orchestrator, tracking) = build_orchestrator(
        Behavior::NoDownload,
        contract_dir.path(),
        Arc::new(RecordingStore::default()),
    );

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Download(WatchError::DownloadTimeout { attempts: 5, .. })
    ));
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn schema_mismatch_publishes_nothing() {
    let contract_dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::default());
    let (orchestrator, tracking) = build_orchestrator(
        Behavior::BadSchema,
        contract_dir.path(),
        store.clone(),
    );

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Transform(TransformError::SchemaMismatch { .. })
    ));
    assert!(store.uploads.lock().unwrap().is_empty());
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn upload_failure_still_tears_down() {
    let contract_dir = TempDir::new().unwrap();
    let (orchestrator, tracking) =
        build_orchestrator(Behavior::Happy, contract_dir.path(), Arc::new(FailingStore));

    let err = orchestrator.run_at(start_instant()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Publish(_)));
    assert_cleaned_up(&tracking);
}

#[tokio::test]
async fn retried_run_with_same_instant_reuses_the_key() {
    let contract_dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::default());
    let (orchestrator, _) =
        build_orchestrator(Behavior::Happy, contract_dir.path(), store.clone());

    orchestrator.run_at(start_instant()).await.unwrap();
    orchestrator.run_at(start_instant()).await.unwrap();

    let uploads = store.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].0, uploads[1].0);
}
