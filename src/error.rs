//! Error types for each pipeline stage.
//!
//! Every stage has its own error enum so callers can decide, per variant,
//! whether a failure skips one item or ends the process.

use thiserror::Error;

/// Failure to turn a relative age string such as `"5m ago"` into an instant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("invalid timestamp format: {0:?}")]
    InvalidTimestampFormat(String),
}

/// Failures of one sentiment classification request.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The provider asked us to slow down. The only retryable variant.
    #[error("provider throttled the request: {0}")]
    Throttled(String),

    /// The first word of the answer was not `YES`, `NO` or `UNKNOWN`.
    #[error("unrecognized classification token: {0:?}")]
    UnrecognizedClassification(String),

    /// The response body did not have the expected shape.
    #[error("malformed classification response: {0}")]
    MalformedResponse(String),

    /// The provider answered with a non-throttling error.
    #[error("provider error ({kind}): {message}")]
    Provider { kind: String, message: String },

    /// Every retry was throttled.
    #[error("classification gave up after {attempts} throttled attempts")]
    RetriesExhausted { attempts: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClassifyError {
    /// Whether a retry may succeed.
    pub fn is_throttled(&self) -> bool {
        matches!(self, ClassifyError::Throttled(_))
    }
}

/// Failures talking to the news store REST API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 401 or 403 from the store.
    #[error("store rejected the shared secret")]
    Unauthorized,

    /// Any other non-success status, with the response body.
    #[error("store API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures dispatching a chat message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of the feed session. All of them are fatal to the poller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("feed request to {url} failed with status {status}")]
    Api { status: u16, url: String },

    /// The login form was still on the page after authenticating.
    #[error("login could not be confirmed: the login form is still present")]
    LoginNotConfirmed,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid selector `{name}`: {reason}")]
    Selector { name: String, reason: String },

    #[error("invalid url for `{name}`: {reason}")]
    Url { name: String, reason: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}
