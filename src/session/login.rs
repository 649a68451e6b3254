//! Login strategies and session establishment
//!
//! A session is established by launching a browser, opening a page,
//! navigating to the site's login page and logging in. Two strategies exist:
//! - Scripted: type credentials key by key, submit, wait for the logged-in marker
//! - Manual: fill inputs directly, then submit while waiting for navigation
//!
//! When the scripted strategy fails for any reason the manual flow is used
//! instead.

use super::{
    navigate_with_retry, with_retry, BrowserLauncher, BrowserPage, BrowserResult, Credentials,
    RetryPolicy, Session, SiteProfile,
};
use crate::Result;

/// How credentials are entered on the login page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStrategy {
    Scripted,
    Manual,
}

impl LoginStrategy {
    /// Picks the preferred strategy for a site
    pub fn for_profile(profile: &SiteProfile) -> Self {
        if profile.scripted_login {
            Self::Scripted
        } else {
            Self::Manual
        }
    }
}

/// Opens authenticated browser sessions
pub struct SessionEstablisher<L> {
    launcher: L,
    retry: RetryPolicy,
}

impl<L: BrowserLauncher> SessionEstablisher<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Launches a browser and logs into the site
    ///
    /// # Arguments
    ///
    /// * `profile` - Selectors and login options for the site
    /// * `base_url` - The course base URL the login path is resolved against
    /// * `credentials` - Username and password
    ///
    /// # Returns
    ///
    /// * `Ok(Session)` - A logged-in session
    /// * `Err(RunnerError)` - Launch or login failed; the browser is closed
    pub async fn establish_session(
        &self,
        profile: &SiteProfile,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<Session> {
        let login_url = profile.login_url(base_url)?;

        let browser = self.launcher.launch().await?;
        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::debug!("Closing browser after failure: {}", close_err);
                }
                return Err(e.context("opening page").into());
            }
        };

        match self.login(page.as_ref(), profile, login_url.as_str(), credentials).await {
            Ok(()) => {
                tracing::info!("Logged in to {} as {}", base_url, credentials.username);
                Ok(Session::new(browser, page))
            }
            Err(e) => {
                drop(page);
                if let Err(close_err) = browser.close().await {
                    tracing::debug!("Closing browser after failure: {}", close_err);
                }
                Err(e.into())
            }
        }
    }

    async fn login(
        &self,
        page: &dyn BrowserPage,
        profile: &SiteProfile,
        login_url: &str,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        navigate_with_retry(page, login_url, &self.retry)
            .await
            .map_err(|e| e.context("navigating to login page"))?;

        if LoginStrategy::for_profile(profile) == LoginStrategy::Scripted {
            match self.scripted_login(page, profile, credentials).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Scripted login failed, falling back to manual login: {}", e);
                    navigate_with_retry(page, login_url, &self.retry)
                        .await
                        .map_err(|e| e.context("returning to login page"))?;
                }
            }
        }

        self.manual_login(page, profile, credentials).await
    }

    async fn scripted_login(
        &self,
        page: &dyn BrowserPage,
        profile: &SiteProfile,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        page.type_text(&profile.username_selector, &credentials.username)
            .await
            .map_err(|e| e.context("typing username"))?;
        page.type_text(&profile.password_selector, &credentials.password)
            .await
            .map_err(|e| e.context("typing password"))?;
        page.click(&profile.submit_selector)
            .await
            .map_err(|e| e.context("submitting login form"))?;
        page.wait_for_selector(&profile.logged_in_selector, profile.selector_timeout())
            .await
            .map_err(|e| e.context("waiting for logged-in marker"))
    }

    async fn manual_login(
        &self,
        page: &dyn BrowserPage,
        profile: &SiteProfile,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        page.fill(&profile.username_selector, &credentials.username)
            .await
            .map_err(|e| e.context("filling username"))?;
        page.fill(&profile.password_selector, &credentials.password)
            .await
            .map_err(|e| e.context("filling password"))?;

        // The navigation wait must be armed before the click lands
        tokio::try_join!(
            with_retry(&self.retry, "post-submit navigation", || page.wait_for_navigation()),
            with_retry(&self.retry, "login submit", || page.click(&profile.submit_selector)),
        )
        .map_err(|e| e.context("submitting login form"))?;

        let timeout = profile.selector_timeout();
        with_retry(&self.retry, "logged-in marker", || {
            page.wait_for_selector(&profile.logged_in_selector, timeout)
        })
        .await
        .map_err(|e| e.context("waiting for logged-in marker"))
    }
}
