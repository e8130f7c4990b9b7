use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::{BrowserError, PageHandle, Selector};
use crate::config::{PipelineConfig, PortalSection, WaitSection};

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login field never appeared: {0}")]
    ElementNotFound(String),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Drives the login form. Fills both fields, submits, then settles for a
/// fixed interval to let the session establish. There is no structural
/// confirmation of success here; a bad login surfaces later as a navigation
/// timeout on the screener page.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    login_url: String,
    identifier_field: Selector,
    secret_field: Selector,
    submit: Selector,
    field_timeout: Duration,
    form_settle: Duration,
    session_settle: Duration,
}

impl LoginFlow {
    pub fn new(
        login_url: impl Into<String>,
        identifier_field: Selector,
        secret_field: Selector,
        submit: Selector,
        field_timeout: Duration,
        form_settle: Duration,
        session_settle: Duration,
    ) -> Self {
        Self {
            login_url: login_url.into(),
            identifier_field,
            secret_field,
            submit,
            field_timeout,
            form_settle,
            session_settle,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::from_sections(&config.portal, &config.waits)
    }

    pub fn from_sections(portal: &PortalSection, waits: &WaitSection) -> Self {
        Self::new(
            portal.login_url.clone(),
            Selector::field(portal.email_field.clone()),
            Selector::field(portal.password_field.clone()),
            Selector::button_text(portal.login_button_label.clone(), false),
            Duration::from_secs(waits.login_field_timeout_s),
            Duration::from_millis(waits.form_settle_ms),
            Duration::from_millis(waits.session_settle_ms),
        )
    }

    pub async fn run(
        &self,
        page: &mut dyn PageHandle,
        identifier: &str,
        secret: &str,
    ) -> AuthResult<()> {
        info!(url = %self.login_url, "navigating to login page");
        page.navigate(&self.login_url).await?;

        match page
            .wait_for_presence(&self.identifier_field, self.field_timeout)
            .await
        {
            Ok(()) => {}
            Err(BrowserError::Timeout(what)) => return Err(AuthError::ElementNotFound(what)),
            Err(other) => return Err(other.into()),
        }
        sleep(self.form_settle).await;

        debug!("filling in credentials");
        page.type_text(&self.identifier_field, identifier).await?;
        page.type_text(&self.secret_field, secret).await?;
        page.click(&self.submit).await?;

        info!(
            settle_ms = self.session_settle.as_millis() as u64,
            "login submitted, waiting for session to establish"
        );
        sleep(self.session_settle).await;
        Ok(())
    }
}
