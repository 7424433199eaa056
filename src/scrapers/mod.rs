//! The news feed: an authenticated session and the card extractor.
//!
//! The poller owns exactly one [`FeedSession`]. The session hands out the
//! current page as HTML; nothing else touches it. [`extract`] turns that
//! snapshot into articles.
//!
//! | Module | Role |
//! |--------|------|
//! | [`newsfilter`] | Cookie-backed HTTP session against the feed site |
//! | [`extract`] | Two selector strategies, one per card layout |

pub mod extract;
pub mod newsfilter;

use crate::error::SessionError;
use std::fmt;

/// Login credentials for the feed site.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A stateful, logged-in view of the feed page.
///
/// Every error is fatal to the poller; there is no session recovery.
pub trait FeedSession {
    /// Load the feed page for the first time.
    async fn open(&mut self) -> Result<(), SessionError>;

    /// Submit credentials. A page that shows no login form needs none.
    async fn login(&mut self, credentials: &Credentials) -> Result<(), SessionError>;

    /// Reload and check that the session is authenticated.
    async fn confirm_login(&mut self) -> Result<(), SessionError>;

    /// Force a fresh, uncached load of the feed page.
    async fn reload(&mut self) -> Result<(), SessionError>;

    /// HTML of the page as of the last load.
    fn snapshot(&self) -> &str;
}
