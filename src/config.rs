//! Non-secret tuning loaded from an optional YAML file.
//!
//! Secrets (credentials, API keys, chat id) come from the CLI or the
//! environment, see [`crate::cli::Cli`]. Everything here has a default so an
//! empty or missing file yields a working configuration.
//!
//! ```yaml
//! feed:
//!   url: https://newsfilter.io/latest/news
//!   reload_settle_secs: 4
//! retry:
//!   max_attempts: 5
//!   base_delay_secs: 30
//! chat:
//!   announce_sleep: true
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// Check that `raw` is an absolute URL, naming the setting in the error.
pub fn validate_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Url {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// All tuning, one section per stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub feed: FeedSettings,
    pub selectors: SelectorSettings,
    pub classifier: ClassifierSettings,
    pub retry: RetrySettings,
    pub chat: ChatSettings,
    pub persist: PersistSettings,
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to a YAML file
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Yaml`]
    /// if it does not parse, or any error from [`Settings::validate`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let settings = Settings::load(Some("quantex.yaml"))?;
    /// println!("Polling {}", settings.feed.url);
    /// ```
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let settings = Self::from_yaml(&raw)?;
                info!(path, "Loaded configuration");
                Ok(settings)
            }
            None => {
                info!("No config file given; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse and validate YAML text. Blank text gives the defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that could only fail later, at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("feed.url", &self.feed.url)?;
        validate_url("feed.login_url", &self.feed.login_url)?;
        validate_url("classifier.endpoint", &self.classifier.endpoint)?;
        validate_url("chat.api_base", &self.chat.api_base)?;
        if self.selectors.strategies.is_empty() {
            return Err(ConfigError::Missing("selectors.strategies"));
        }
        Ok(())
    }
}

/// Where the feed lives and how long to let pages settle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub url: String,
    pub login_url: String,
    /// Present on the page only while logged out.
    pub login_form_selector: String,
    pub auth_settle_secs: u64,
    pub reload_settle_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "https://newsfilter.io/latest/news".to_string(),
            login_url: "https://newsfilter.io/login".to_string(),
            login_form_selector: r#"input[name="password"]"#.to_string(),
            auth_settle_secs: 10,
            reload_settle_secs: 4,
        }
    }
}

impl FeedSettings {
    /// Wait after submitting the login form.
    pub fn auth_settle(&self) -> Duration {
        Duration::from_secs(self.auth_settle_secs)
    }

    /// Wait after each page reload.
    pub fn reload_settle(&self) -> Duration {
        Duration::from_secs(self.reload_settle_secs)
    }
}

/// CSS selectors for one markup variant of a feed card.
///
/// `tickers`, `timestamp` and `headline` are matched inside a card.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategySelectors {
    pub name: String,
    pub tickers: String,
    pub timestamp: String,
    pub headline: String,
    /// The anchored variant ends its ticker row with a badge that is not a ticker.
    #[serde(default)]
    pub drop_last_ticker: bool,
}

/// How cards are found on the page and read.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    /// Matches every card on the feed page.
    pub feed_item: String,
    pub strategies: Vec<StrategySelectors>,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            feed_item: "body > div > div:nth-of-type(2) > div:nth-of-type(4) > div > div > div > div"
                .to_string(),
            strategies: vec![
                StrategySelectors {
                    name: "anchored".to_string(),
                    tickers: "a > div > div:nth-of-type(2) > div > span".to_string(),
                    timestamp: "a > div > div:nth-of-type(1) > div > span".to_string(),
                    headline: "a > div > div:nth-of-type(3) > div > span:nth-of-type(1)".to_string(),
                    drop_last_ticker: true,
                },
                StrategySelectors {
                    name: "plain".to_string(),
                    tickers: "div > div > div:nth-of-type(2) > div > span:nth-of-type(1)".to_string(),
                    timestamp: "div > div > div:nth-of-type(1) > div > span".to_string(),
                    headline: "div > div > div:nth-of-type(3) > div > span:nth-of-type(1)".to_string(),
                    drop_last_ticker: false,
                },
            ],
        }
    }
}

/// Eden AI endpoint and model choice.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.edenai.run/v2/text/chat".to_string(),
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 150,
        }
    }
}

/// Backoff for provider throttling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 300,
            jitter_ms: 250,
        }
    }
}

/// Telegram Bot API location and status messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub api_base: String,
    /// Post a "sleeping until" message before each inter-cycle sleep.
    pub announce_sleep: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            announce_sleep: false,
        }
    }
}

/// Retry bound for rows the store did not accept.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistSettings {
    /// Failed writes, the first one included, after which a parked row is
    /// dropped. A row is always retried at least once.
    pub max_pending_attempts: u32,
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            max_pending_attempts: 5,
        }
    }
}
