use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};
use super::page::{ChromiumPage, PageHandle};

/// Per-run directories the session is bound to: downloads land in one, the
/// browser profile lives in the other. Both sit inside the run's temp dir.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    pub downloads: PathBuf,
    pub profile: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// One live browser session yielding a single controllable page. Closing
/// tears the browser down and joins its CDP handler task.
#[async_trait(?Send)]
pub trait PageSession {
    fn page(&mut self) -> &mut dyn PageHandle;
    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait PageSessionFactory: Send + Sync {
    async fn create(&self, dirs: &SessionDirs) -> BrowserResult<Box<dyn PageSession>>;
}

#[derive(Debug, Clone)]
pub struct ChromiumSessionFactory {
    config: ChromiumSection,
    poll_interval: Duration,
    overrides: LaunchOverrides,
}

impl ChromiumSessionFactory {
    pub fn new(config: ChromiumSection, poll_interval: Duration) -> Self {
        Self {
            config,
            poll_interval,
            overrides: LaunchOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

#[async_trait(?Send)]
impl PageSessionFactory for ChromiumSessionFactory {
    async fn create(&self, dirs: &SessionDirs) -> BrowserResult<Box<dyn PageSession>> {
        let headless = self.overrides.headless.unwrap_or(self.config.headless);
        let chromium_config = build_chromium_config(&self.config, &dirs.profile, headless)?;
        info!(
            headless,
            downloads = %dirs.downloads.display(),
            "launching chromium for export session"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;

        // Route downloads into the session's directory.
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dirs.downloads.display().to_string())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.execute(behavior).await?;

        Ok(Box::new(ChromiumSession {
            browser,
            handler_task: Some(handler_task),
            page: ChromiumPage::new(page, self.poll_interval),
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    page: ChromiumPage,
}

#[async_trait(?Send)]
impl PageSession for ChromiumSession {
    fn page(&mut self) -> &mut dyn PageHandle {
        &mut self.page
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        info!("shutting down chromium session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("chromium session dropped without explicit close");
            }
        }
    }
}

fn build_chromium_config(
    config: &ChromiumSection,
    profile_dir: &Path,
    headless: bool,
) -> BrowserResult<ChromiumConfig> {
    let mut builder = ChromiumConfig::builder()
        .chrome_executable(&config.executable_path)
        .user_data_dir(profile_dir);

    if !headless {
        builder = builder.with_head();
    }
    if !config.sandbox {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--no-first-run".to_string(),
        "--password-store=basic".to_string(),
    ];
    if config.disable_gpu {
        args.push("--disable-gpu".into());
    }
    if config.disable_dev_shm {
        args.push("--disable-dev-shm-usage".into());
    }
    builder = builder.args(args);

    builder.build().map_err(BrowserError::Configuration)
}
