//! Cookie-backed HTTP session against the newsfilter feed.
//!
//! The session keeps its cookie jar across reloads so a single login lasts
//! for the life of the process. Every page load asks intermediaries not to
//! serve a cached copy.

use super::{Credentials, FeedSession};
use crate::config::FeedSettings;
use crate::error::{ConfigError, SessionError};
use crate::scrapers::extract::parse_selector;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const USER_AGENT: &str = concat!("quantex_news/", env!("CARGO_PKG_VERSION"));

/// Cookie-backed HTTP session against the feed site.
///
/// Every request carries no-cache headers so a reload always returns the
/// current page.
pub struct HttpFeedSession {
    client: Client,
    feed_url: String,
    login_url: String,
    login_form: Selector,
    page: String,
}

impl HttpFeedSession {
    /// Build a logged-out session. Nothing is fetched until [`FeedSession::open`].
    ///
    /// # Arguments
    ///
    /// * `settings` - Feed and login URLs plus the login form selector
    ///
    /// # Errors
    ///
    /// [`ConfigError::Selector`] if the login form selector does not parse,
    /// [`ConfigError::Client`] if the HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut session = HttpFeedSession::new(&settings.feed)?;
    /// session.open().await?;
    /// session.login(&credentials).await?;
    /// ```
    pub fn new(settings: &FeedSettings) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            feed_url: settings.url.clone(),
            login_url: settings.login_url.clone(),
            login_form: parse_selector("login_form_selector", &settings.login_form_selector)?,
            page: String::new(),
        })
    }

    fn shows_login_form(&self) -> bool {
        Html::parse_document(&self.page)
            .select(&self.login_form)
            .next()
            .is_some()
    }

    #[instrument(level = "debug", skip_all, fields(url = %self.feed_url))]
    async fn fetch(&mut self) -> Result<(), SessionError> {
        let resp = self.client.get(&self.feed_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Api {
                status: status.as_u16(),
                url: self.feed_url.clone(),
            });
        }
        self.page = resp.text().await?;
        debug!(bytes = self.page.len(), "Loaded feed page");
        Ok(())
    }
}

impl FeedSession for HttpFeedSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        info!(url = %self.feed_url, "Opening feed");
        self.fetch().await
    }

    #[instrument(level = "info", skip_all, fields(email = %credentials.email))]
    async fn login(&mut self, credentials: &Credentials) -> Result<(), SessionError> {
        if !self.shows_login_form() {
            info!("No login form on page; session already authenticated");
            return Ok(());
        }

        debug!(url = %self.login_url, "Submitting credentials");
        let form = [
            ("email", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let resp = self.client.post(&self.login_url).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Login request rejected");
            return Err(SessionError::Api {
                status: status.as_u16(),
                url: self.login_url.clone(),
            });
        }
        Ok(())
    }

    async fn confirm_login(&mut self) -> Result<(), SessionError> {
        self.fetch().await?;
        if self.shows_login_form() {
            return Err(SessionError::LoginNotConfirmed);
        }
        info!("Login confirmed");
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), SessionError> {
        info!("Hard reloading feed");
        self.fetch().await
    }

    fn snapshot(&self) -> &str {
        &self.page
    }
}
