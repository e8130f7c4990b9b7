use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::{BrowserError, PageHandle, Selector};
use crate::config::{PortalSection, WaitSection};

pub type NavResult<T> = Result<T, NavError>;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("navigation timeout at {stage}: {detail}")]
    Timeout { stage: &'static str, detail: String },
    #[error("export control not found: {0}")]
    ExportControlNotFound(String),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Progress through the export UI. `MenuOpened` is optional: some layouts
/// render the export action without a collapsible menu in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    Idle,
    ScreenerLoaded,
    ViewSelected,
    MenuOpened,
    ExportTriggered,
}

/// What a completed navigation actually did, for the run log.
#[derive(Debug, Clone, Serialize)]
pub struct NavReport {
    pub state: NavState,
    pub menu_strategy: Option<String>,
    pub menu_skipped: bool,
    pub export_label: Option<String>,
}

/// State machine that walks the portal UI from the listing page to a
/// triggered export. Each transition carries its own timeout budget and its
/// own fatal/non-fatal classification, so layout variance (pre-expanded
/// menu, exact vs fuzzy button label) is absorbed here and never reaches
/// the caller.
#[derive(Debug, Clone)]
pub struct ExportNavigator {
    screener_url: String,
    view_marker: Selector,
    menu_strategies: Vec<Selector>,
    menu_container: Option<Selector>,
    export_action: Selector,
    marker_timeout: Duration,
    view_click_timeout: Duration,
    menu_trigger_timeout: Duration,
    menu_container_timeout: Duration,
    export_timeout: Duration,
    view_settle: Duration,
    menu_settle: Duration,
}

impl ExportNavigator {
    pub fn from_sections(portal: &PortalSection, waits: &WaitSection) -> Self {
        let menu_container = if portal.menu_container_markers.is_empty() {
            None
        } else {
            Some(Selector::css(portal.menu_container_markers.join(", ")))
        };
        Self {
            screener_url: portal.screener_url.clone(),
            view_marker: Selector::button_text(portal.view_marker_label.clone(), false),
            menu_strategies: vec![
                Selector::button_text(portal.menu_trigger_label.clone(), true),
                Selector::button_text(portal.menu_trigger_label.clone(), false),
            ],
            menu_container,
            export_action: Selector::action_text(portal.export_action_label.clone()),
            marker_timeout: Duration::from_secs(waits.marker_timeout_s),
            view_click_timeout: Duration::from_secs(waits.view_click_timeout_s),
            menu_trigger_timeout: Duration::from_secs(waits.menu_trigger_timeout_s),
            menu_container_timeout: Duration::from_secs(waits.menu_container_timeout_s),
            export_timeout: Duration::from_secs(waits.export_timeout_s),
            view_settle: Duration::from_millis(waits.view_settle_ms),
            menu_settle: Duration::from_millis(waits.menu_settle_ms),
        }
    }

    /// Replace the ordered fallback list for the menu trigger.
    pub fn with_menu_strategies(mut self, strategies: Vec<Selector>) -> Self {
        self.menu_strategies = strategies;
        self
    }

    pub async fn run(&self, page: &mut dyn PageHandle) -> NavResult<NavReport> {
        info!(url = %self.screener_url, "opening screener page");
        page.navigate(&self.screener_url).await?;

        match page
            .wait_for_presence(&self.view_marker, self.marker_timeout)
            .await
        {
            Ok(()) => {}
            Err(BrowserError::Timeout(detail)) => {
                return Err(NavError::Timeout {
                    stage: "screener load",
                    detail,
                })
            }
            Err(other) => return Err(other.into()),
        }
        let mut state = NavState::ScreenerLoaded;
        debug!(state = ?state, "view marker present");

        match page
            .wait_for_clickable(&self.view_marker, self.view_click_timeout)
            .await
        {
            Ok(()) => {}
            Err(BrowserError::Timeout(detail)) => {
                return Err(NavError::Timeout {
                    stage: "view select",
                    detail,
                })
            }
            Err(other) => return Err(other.into()),
        }
        page.click(&self.view_marker).await?;
        sleep(self.view_settle).await;
        state = NavState::ViewSelected;
        debug!(state = ?state, "view selected");

        let mut menu_strategy = None;
        for strategy in &self.menu_strategies {
            match page
                .wait_for_clickable(strategy, self.menu_trigger_timeout)
                .await
            {
                Ok(()) => {
                    page.click(strategy).await?;
                    menu_strategy = Some(strategy.to_string());
                    break;
                }
                Err(BrowserError::Timeout(_)) => {
                    debug!(strategy = %strategy, "menu trigger strategy missed");
                }
                Err(other) => return Err(other.into()),
            }
        }

        let menu_skipped = menu_strategy.is_none();
        if let Some(strategy) = &menu_strategy {
            if let Some(container) = &self.menu_container {
                // Non-fatal: the export action may already be visible.
                if let Err(err) = page
                    .wait_for_presence(container, self.menu_container_timeout)
                    .await
                {
                    debug!(error = %err, "menu container never surfaced");
                }
            }
            sleep(self.menu_settle).await;
            state = NavState::MenuOpened;
            debug!(state = ?state, strategy = %strategy, "export menu opened");
        } else {
            info!("no menu trigger matched, treating menu as already expanded");
        }

        match page
            .wait_for_clickable(&self.export_action, self.export_timeout)
            .await
        {
            Ok(()) => {}
            Err(BrowserError::Timeout(_)) => {
                return Err(NavError::ExportControlNotFound(
                    self.export_action.to_string(),
                ))
            }
            Err(other) => return Err(other.into()),
        }
        let export_label = page.read_text(&self.export_action).await.unwrap_or(None);
        page.click(&self.export_action).await?;
        state = NavState::ExportTriggered;
        info!(
            state = ?state,
            label = export_label.as_deref().unwrap_or(""),
            "export triggered"
        );

        Ok(NavReport {
            state,
            menu_strategy,
            menu_skipped,
            export_label,
        })
    }
}
