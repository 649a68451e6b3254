//! Authenticated browser sessions
//!
//! This module opens a browser automation session against a target site and
//! logs in, including:
//! - Browser/page abstractions (`BrowserLauncher`, `BrowserHandle`, `BrowserPage`)
//! - Typed browser errors whose kind decides retry eligibility
//! - The shared transient-failure retry wrapper
//! - Scripted and manual login strategies
//! - A Chromium backend built on chromiumoxide

mod chromium;
mod login;
mod profile;
mod retry;

pub use chromium::ChromiumLauncher;
pub use login::{LoginStrategy, SessionEstablisher};
pub use profile::{Credentials, SiteProfile};
pub use retry::{navigate_with_retry, with_retry, RetryPolicy};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Classification of a browser failure, decided where the failure occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserErrorKind {
    /// The network configuration changed mid-request (`net::ERR_NETWORK_CHANGED`)
    NetworkChanged,

    /// A navigation or wait did not finish in time
    Timeout,

    /// A selector matched nothing
    ElementNotFound,

    /// The browser could not be started
    Launch,

    /// Any other protocol-level failure
    Protocol,
}

impl BrowserErrorKind {
    /// Returns true if an operation failing with this kind may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkChanged)
    }
}

impl fmt::Display for BrowserErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkChanged => "network changed",
            Self::Timeout => "timeout",
            Self::ElementNotFound => "element not found",
            Self::Launch => "launch failed",
            Self::Protocol => "protocol error",
        };
        f.write_str(name)
    }
}

/// Error produced by a browser operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BrowserError {
    pub kind: BrowserErrorKind,
    pub message: String,
}

impl BrowserError {
    pub fn new(kind: BrowserErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if the retry wrapper may retry this error
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Prefixes the message with the step that failed, keeping the kind
    pub fn context(self, step: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", step, self.message),
        }
    }
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// A single page (tab) in a browser
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate to a URL and wait for it to load
    async fn goto(&self, url: &str) -> BrowserResult<()>;

    /// Wait for the next navigation to finish
    async fn wait_for_navigation(&self) -> BrowserResult<()>;

    /// Wait until a selector matches an element
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    /// Set an input's value directly
    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Focus an element and type into it key by key
    async fn type_text(&self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Click the element matching a selector
    async fn click(&self, selector: &str) -> BrowserResult<()>;

    /// Full HTML of the page
    async fn content(&self) -> BrowserResult<String>;

    /// Cookies of the page formatted as a `Cookie` header value
    async fn cookie_header(&self) -> BrowserResult<Option<String>>;
}

/// A running browser instance
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new page
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;

    /// Shut the browser down
    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

/// Starts browser instances
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserHandle>>;
}

/// A live, authenticated browser session
pub struct Session {
    browser: Box<dyn BrowserHandle>,
    page: Box<dyn BrowserPage>,
}

impl Session {
    pub(crate) fn new(browser: Box<dyn BrowserHandle>, page: Box<dyn BrowserPage>) -> Self {
        Self { browser, page }
    }

    /// The logged-in page
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    /// Closes the page's browser
    pub async fn close(self) -> BrowserResult<()> {
        drop(self.page);
        self.browser.close().await
    }
}
