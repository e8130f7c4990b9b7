use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;

use crate::wait::{attempts_for, await_condition};

use super::error::{BrowserError, BrowserResult};
use super::selector::Selector;

/// A controllable page. The pipeline only ever talks to the portal through
/// this seam, so tests drive the navigation logic with scripted fakes.
#[async_trait(?Send)]
pub trait PageHandle {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    /// Wait for the target to exist in the DOM.
    async fn wait_for_presence(&mut self, target: &Selector, timeout: Duration)
        -> BrowserResult<()>;
    /// Wait for the target to exist *and* report a layout box.
    async fn wait_for_clickable(
        &mut self,
        target: &Selector,
        timeout: Duration,
    ) -> BrowserResult<()>;
    async fn click(&mut self, target: &Selector) -> BrowserResult<()>;
    async fn type_text(&mut self, target: &Selector, text: &str) -> BrowserResult<()>;
    async fn read_text(&mut self, target: &Selector) -> BrowserResult<Option<String>>;
}

/// Chromium-backed [`PageHandle`] over a CDP page.
#[derive(Debug)]
pub struct ChromiumPage {
    page: Page,
    poll_interval: Duration,
}

impl ChromiumPage {
    pub fn new(page: Page, poll_interval: Duration) -> Self {
        Self {
            page,
            poll_interval,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn resolve(&self, target: &Selector) -> BrowserResult<Option<Element>> {
        resolve_element(&self.page, target).await
    }
}

#[async_trait(?Send)]
impl PageHandle for ChromiumPage {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn wait_for_presence(
        &mut self,
        target: &Selector,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let attempts = attempts_for(timeout, self.poll_interval);
        let page = &self.page;
        let found = await_condition(attempts, self.poll_interval, move || {
            let page = page;
            async move {
                Ok::<_, BrowserError>(resolve_element(page, target).await?.map(|_| ()))
            }
        })
        .await?;
        found.ok_or_else(|| BrowserError::Timeout(format!("presence of {target}")))
    }

    async fn wait_for_clickable(
        &mut self,
        target: &Selector,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let attempts = attempts_for(timeout, self.poll_interval);
        let page = &self.page;
        let found = await_condition(attempts, self.poll_interval, move || {
            let page = page;
            async move {
                match resolve_element(page, target).await? {
                    Some(element) => {
                        Ok::<_, BrowserError>(element.bounding_box().await.ok().map(|_| ()))
                    }
                    None => Ok(None),
                }
            }
        })
        .await?;
        found.ok_or_else(|| BrowserError::Timeout(format!("clickable {target}")))
    }

    async fn click(&mut self, target: &Selector) -> BrowserResult<()> {
        let element = self
            .resolve(target)
            .await?
            .ok_or_else(|| BrowserError::Unexpected(format!("no element to click for {target}")))?;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click {target}: {err}")))?;
        Ok(())
    }

    async fn type_text(&mut self, target: &Selector, text: &str) -> BrowserResult<()> {
        let element = self
            .resolve(target)
            .await?
            .ok_or_else(|| BrowserError::Unexpected(format!("no element to type into for {target}")))?;
        element.click().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to focus {target}: {err}"))
        })?;
        element.type_str(text).await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to type into {target}: {err}"))
        })?;
        Ok(())
    }

    async fn read_text(&mut self, target: &Selector) -> BrowserResult<Option<String>> {
        if self.resolve(target).await?.is_none() {
            return Ok(None);
        }
        let query = serde_json::to_string(&target.css_query())
            .map_err(|err| BrowserError::Unexpected(format!("bad css query: {err}")))?;
        let script = format!(
            r#"(() => {{
    const node = document.querySelector({query});
    return node ? (node.innerText || node.textContent || '').trim() : null;
}})()"#
        );
        let text: Option<String> = self
            .page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode text payload: {err}"))
            })?;
        Ok(text.filter(|value| !value.is_empty()))
    }
}

/// Resolve a selector to its first matching element, running the tagging
/// script first for text-matched variants.
pub(crate) async fn resolve_element(
    page: &Page,
    target: &Selector,
) -> BrowserResult<Option<Element>> {
    if let Some(script) = target.tagging_script() {
        let hits: u32 = page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode hit count: {err}"))
            })?;
        if hits == 0 {
            return Ok(None);
        }
    }
    Ok(page.find_element(target.css_query()).await.ok())
}
