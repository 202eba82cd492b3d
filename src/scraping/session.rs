//! The browser surface the crawl engine consumes.
//!
//! `SessionDriver` is a handful of primitives plus typed
//! helpers whose default implementations go through [`SessionDriver::evaluate`].
//! `ChromeSession` is the production implementation over one chromiumoxide tab.

use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser_manager::{self, LaunchOptions};
use super::scripts;
use crate::core::error::SessionError;

/// One `<option>` as read from the page, placeholders included.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawOption {
    pub value: String,
    pub label: String,
}

impl RawOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
pub trait SessionDriver: Send {
    /// Load `url` in the tab, replacing the current document.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Select `value` in `control`. Fails with `OptionUnavailable` when the
    /// control's current option set does not contain it.
    async fn select_option(&mut self, control: &str, value: &str) -> Result<(), SessionError>;

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError>;

    /// Wait until `selector` is attached to the DOM. Fails with `Timeout`.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    async fn query_count(&mut self, selector: &str) -> Result<usize, SessionError>;

    /// Click the first element matching `selector`. `Ok(false)` when nothing matches.
    async fn click(&mut self, selector: &str) -> Result<bool, SessionError>;

    /// Save a PNG of the current viewport to `path`.
    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError>;

    /// Release the underlying browser. The session is unusable afterwards.
    async fn close(&mut self) {}

    async fn read_options(&mut self, control: &str) -> Result<Vec<RawOption>, SessionError> {
        let v = self.evaluate(&scripts::read_options(control)).await?;
        if v.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(v).map_err(|e| SessionError::Script(e.to_string()))
    }

    async fn selected_value(&mut self, control: &str) -> Result<Option<String>, SessionError> {
        let v = self.evaluate(&scripts::selected_value(control)).await?;
        Ok(v.as_str().map(str::to_string))
    }

    async fn table_html(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        let v = self.evaluate(&scripts::outer_html(selector)).await?;
        Ok(v.as_str().map(str::to_string))
    }

    /// Force the result widget to show every row. `Ok(false)` when the widget
    /// has no page-size control.
    async fn expand_page_size(&mut self, select_name: &str) -> Result<bool, SessionError> {
        let v = self.evaluate(&scripts::expand_page_size(select_name)).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn row_count(&mut self, table: &str) -> Result<usize, SessionError> {
        self.query_count(&format!("{} tbody tr", table)).await
    }
}

// ── chromiumoxide implementation ─────────────────────────────────────────────

/// A single browser tab, exclusively owned by one crawl.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    /// Launch a browser and open a blank tab.
    pub async fn launch(opts: &LaunchOptions) -> Result<Self, SessionError> {
        let config = browser_manager::build_launch_config(opts)
            .map_err(|e| SessionError::Browser(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            SessionError::Browser(format!("failed to launch ({}): {}", opts.executable, e))
        })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Browser(format!("failed to open tab: {}", e)))?;

        info!("browser session ready ({})", opts.executable);
        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub async fn shutdown(mut self) {
        self.close().await;
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl SessionDriver for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(SessionError::Browser(format!("goto {}: {}", url, e))),
            Err(_) => {
                return Err(SessionError::Timeout {
                    what: format!("navigation to {}", url),
                    timeout,
                })
            }
        }
        browser_manager::wait_until_ready(&self.page, 500, timeout.as_millis() as u64).await;
        Ok(())
    }

    async fn select_option(&mut self, control: &str, value: &str) -> Result<(), SessionError> {
        let outcome = self.evaluate(&scripts::select_option(control, value)).await?;
        match outcome.as_str() {
            Some("ok") => Ok(()),
            Some("missing") => Err(SessionError::ElementMissing(control.to_string())),
            _ => Err(SessionError::OptionUnavailable {
                control: control.to_string(),
                value: value.to_string(),
            }),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let start = Instant::now();
        let probe = scripts::element_exists(selector);
        loop {
            // Evaluation errors are expected while a submit reloads the document.
            if let Ok(v) = self.evaluate(&probe).await {
                if v.as_bool() == Some(true) {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(SessionError::Timeout {
                    what: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn query_count(&mut self, selector: &str) -> Result<usize, SessionError> {
        let v = self.evaluate(&scripts::count(selector)).await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, SessionError> {
        let element = match self.page.find_element(selector).await {
            Ok(el) => el,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .await
            .map_err(|e| SessionError::Browser(format!("click {}: {}", selector, e)))?;
        Ok(true)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError> {
        use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
        use chromiumoxide::page::ScreenshotParams;

        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| SessionError::Browser(format!("screenshot: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close error (non-fatal): {}", e);
        }
        self.handler.abort();
        info!("browser session closed");
    }
}
