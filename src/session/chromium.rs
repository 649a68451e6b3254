//! Chromium backend built on chromiumoxide

use super::{BrowserError, BrowserErrorKind, BrowserHandle, BrowserLauncher, BrowserPage, BrowserResult};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches local Chromium instances
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.config.navigation_timeout_ms)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserHandle>> {
        let mut builder = CdpBrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .request_timeout(self.navigation_timeout());

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.config.chrome_executable {
            builder = builder.chrome_executable(executable);
        }

        let cdp_config = builder.build().map_err(|e| {
            BrowserError::new(
                BrowserErrorKind::Launch,
                format!("invalid browser configuration: {}", e),
            )
        })?;

        let (browser, mut handler) = Browser::launch(cdp_config).await.map_err(|e| {
            BrowserError::new(
                BrowserErrorKind::Launch,
                format!("failed to launch Chromium: {}", e),
            )
        })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler event error: {}", e);
                }
            }
        });

        tracing::debug!("Launched Chromium (headless: {})", self.config.headless);

        Ok(Box::new(ChromiumBrowser {
            browser,
            handler_task,
            navigation_timeout: self.navigation_timeout(),
        }))
    }
}

struct ChromiumBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| classify(e, "opening page"))?;

        Ok(Box::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        let ChromiumBrowser {
            mut browser,
            handler_task,
            ..
        } = *self;

        let result = browser.close().await.map_err(|e| classify(e, "closing browser"));
        if let Err(e) = browser.wait().await {
            tracing::debug!("Waiting for browser exit failed: {}", e);
        }
        handler_task.abort();
        result.map(|_| ())
    }
}

struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromiumPage {
    /// Bounds a CDP call by the navigation timeout and classifies its failure
    async fn bounded<T, F>(&self, step: &str, fut: F) -> BrowserResult<T>
    where
        F: Future<Output = Result<T, CdpError>>,
    {
        match tokio::time::timeout(self.navigation_timeout, fut).await {
            Ok(result) => result.map_err(|e| classify(e, step)),
            Err(_) => Err(BrowserError::new(
                BrowserErrorKind::Timeout,
                format!("{} timed out after {:?}", step, self.navigation_timeout),
            )),
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.bounded(&format!("navigating to {}", url), self.page.goto(url))
            .await
            .map(|_| ())
    }

    async fn wait_for_navigation(&self) -> BrowserResult<()> {
        self.bounded("waiting for navigation", self.page.wait_for_navigation())
            .await
            .map(|_| ())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let start = Instant::now();
        loop {
            match self.page.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = classify(e, &format!("waiting for {}", selector));
                    if err.is_transient() {
                        return Err(err);
                    }
                    if start.elapsed() >= timeout {
                        return Err(BrowserError::new(
                            BrowserErrorKind::ElementNotFound,
                            format!("{} did not appear within {:?}", selector, timeout),
                        ));
                    }
                }
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        let script = fill_script(selector, value).map_err(|e| {
            BrowserError::new(BrowserErrorKind::Protocol, format!("encoding fill script: {}", e))
        })?;

        let found = self
            .bounded(&format!("filling {}", selector), self.page.evaluate(script))
            .await?
            .into_value::<bool>()
            .unwrap_or(false);

        if found {
            Ok(())
        } else {
            Err(BrowserError::new(BrowserErrorKind::ElementNotFound, selector))
        }
    }

    async fn type_text(&self, selector: &str, value: &str) -> BrowserResult<()> {
        let step = format!("typing into {}", selector);
        let element = self.page.find_element(selector).await.map_err(|e| classify(e, &step))?;
        element.click().await.map_err(|e| classify(e, &step))?;
        element.type_str(value).await.map_err(|e| classify(e, &step))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        let step = format!("clicking {}", selector);
        let element = self.page.find_element(selector).await.map_err(|e| classify(e, &step))?;
        element.click().await.map_err(|e| classify(e, &step))?;
        Ok(())
    }

    async fn content(&self) -> BrowserResult<String> {
        self.page.content().await.map_err(|e| classify(e, "reading content"))
    }

    async fn cookie_header(&self) -> BrowserResult<Option<String>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| classify(e, "reading cookies"))?;

        if cookies.is_empty() {
            return Ok(None);
        }

        let header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Some(header))
    }
}

/// Converts a CDP failure into a typed browser error
///
/// Network-change failures surface as navigation errors whose text carries
/// Chromium's `net::ERR_NETWORK_CHANGED` code.
fn classify(err: CdpError, step: &str) -> BrowserError {
    let message = err.to_string();
    let kind = if message.contains("ERR_NETWORK_CHANGED") {
        BrowserErrorKind::NetworkChanged
    } else if matches!(err, CdpError::Timeout) {
        BrowserErrorKind::Timeout
    } else if message.contains("Could not find node") || message.contains("not found") {
        BrowserErrorKind::ElementNotFound
    } else {
        BrowserErrorKind::Protocol
    };
    BrowserError::new(kind, format!("{}: {}", step, message))
}

fn fill_script(selector: &str, value: &str) -> Result<String, serde_json::Error> {
    Ok(format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    el.focus();
    el.value = {value};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
        selector = serde_json::to_string(selector)?,
        value = serde_json::to_string(value)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_script_escapes_arguments() {
        let script = fill_script("input[name=\"user\"]", "pa\"ss'word").unwrap();
        assert!(script.contains(r#"document.querySelector("input[name=\"user\"]")"#));
        assert!(script.contains(r#"el.value = "pa\"ss'word";"#));
    }
}
