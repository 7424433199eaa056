//! Sentiment classification API with bounded retry on provider throttling.
//!
//! # Architecture
//!
//! - [`Classify`]: core trait, one prompt in, the generated text out
//! - [`EdenAiClient`]: the chat endpoint of the Eden AI gateway
//! - [`RetryClassify`]: decorator that retries throttled requests
//!
//! # Retry Strategy
//!
//! Only [`ClassifyError::Throttled`] is retried. Every other failure goes
//! straight back to the caller. The delay between attempts follows
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! and once `max_attempts` requests have all been throttled the decorator
//! gives up with [`ClassifyError::RetriesExhausted`].

use crate::config::{ClassifierSettings, RetrySettings};
use crate::error::ClassifyError;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Error type the gateway reports when the upstream provider rate-limits us.
const THROTTLED_ERROR_TYPE: &str = "ProviderLimitationError";

/// The text sent to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// The question itself.
    pub text: String,
    /// System-level style directive.
    pub directive: String,
}

/// Something that can answer a [`Prompt`].
pub trait Classify {
    /// Send one prompt and return the raw generated text.
    ///
    /// # Errors
    ///
    /// [`ClassifyError::Throttled`] when the provider rate-limits the call,
    /// any other variant for failures a retry will not fix.
    async fn classify(&self, prompt: &Prompt) -> Result<String, ClassifyError>;
}

impl<T: Classify> Classify for &T {
    async fn classify(&self, prompt: &Prompt) -> Result<String, ClassifyError> {
        (**self).classify(prompt).await
    }
}

/// Wrapper that retries throttled requests with exponential backoff.
pub struct RetryClassify<T> {
    inner: T,
    /// Total requests allowed, the first one included.
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ms: u64,
}

impl<T> RetryClassify<T>
where
    T: Classify,
{
    /// Wrap a classifier with throttling retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The classifier to retry
    /// * `settings` - Attempt cap and backoff bounds. A `max_attempts` of 0
    ///   is treated as 1.
    ///
    /// # Returns
    ///
    /// A [`RetryClassify`] that itself implements [`Classify`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let classifier = RetryClassify::new(
    ///     EdenAiClient::new(client, &api_key, &settings.classifier),
    ///     &settings.retry,
    /// );
    /// let answer = classifier.classify(&prompt).await?;
    /// ```
    pub fn new(inner: T, settings: &RetrySettings) -> Self {
        Self {
            inner,
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_secs(settings.base_delay_secs),
            max_delay: Duration::from_secs(settings.max_delay_secs),
            jitter_ms: settings.jitter_ms,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        if self.jitter_ms == 0 {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryClassify<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClassify")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Classify for RetryClassify<T>
where
    T: Classify,
{
    #[instrument(level = "info", skip_all)]
    async fn classify(&self, prompt: &Prompt) -> Result<String, ClassifyError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.classify(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_throttled() => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total,
                            error = %e,
                            "classify() still throttled; giving up"
                        );
                        return Err(ClassifyError::RetriesExhausted { attempts: attempt });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "classify() throttled; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderAnswer {
    generated_text: Option<String>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Value,
}

/// Client for the Eden AI `text/chat` endpoint.
pub struct EdenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    provider: String,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for EdenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdenAiClient")
            .field("endpoint", &self.endpoint)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

impl EdenAiClient {
    /// Build a client sharing an existing HTTP connection pool.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared `reqwest` client
    /// * `api_key` - Eden AI bearer token
    /// * `settings` - Endpoint, provider, model and token limit
    pub fn new(client: Client, api_key: &str, settings: &ClassifierSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: api_key.to_string(),
            provider: settings.provider.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    fn payload(&self, prompt: &Prompt) -> Value {
        let mut settings = serde_json::Map::new();
        settings.insert(self.provider.clone(), Value::String(self.model.clone()));
        json!({
            "providers": self.provider,
            "text": prompt.text,
            "chat_global_action": prompt.directive,
            "previous_history": [],
            "temperature": 0.0,
            "max_tokens": self.max_tokens,
            "settings": settings,
        })
    }

    /// Pull the generated text for our provider out of a response body.
    fn read_answer(&self, body: &str) -> Result<String, ClassifyError> {
        let mut answers: HashMap<String, Value> = serde_json::from_str(body).map_err(|e| {
            ClassifyError::MalformedResponse(format!("{e}: {}", truncate_for_log(body, 300)))
        })?;

        let entry = answers.remove(&self.provider).ok_or_else(|| {
            ClassifyError::MalformedResponse(format!(
                "no `{}` entry in response: {}",
                self.provider,
                truncate_for_log(body, 300)
            ))
        })?;
        let answer: ProviderAnswer = serde_json::from_value(entry)
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;

        if let Some(text) = answer.generated_text {
            return Ok(text);
        }

        match answer.error {
            Some(err) => {
                let message = match err.message {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                if err.kind == THROTTLED_ERROR_TYPE {
                    Err(ClassifyError::Throttled(message))
                } else {
                    Err(ClassifyError::Provider {
                        kind: err.kind,
                        message,
                    })
                }
            }
            None => Err(ClassifyError::MalformedResponse(format!(
                "neither text nor error in response: {}",
                truncate_for_log(body, 300)
            ))),
        }
    }
}

impl Classify for EdenAiClient {
    #[instrument(level = "info", skip_all, fields(provider = %self.provider))]
    async fn classify(&self, prompt: &Prompt) -> Result<String, ClassifyError> {
        let t0 = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.payload(prompt))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        let elapsed_ms = t0.elapsed().as_millis();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(elapsed_ms, "Classifier returned 429");
            return Err(ClassifyError::Throttled(truncate_for_log(&body, 300)));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), elapsed_ms, "Classifier request failed");
            // The gateway reports provider failures inside the body even on error statuses.
            return match self.read_answer(&body) {
                Err(e @ (ClassifyError::Throttled(_) | ClassifyError::Provider { .. })) => Err(e),
                _ => Err(ClassifyError::Provider {
                    kind: format!("http_{}", status.as_u16()),
                    message: truncate_for_log(&body, 300),
                }),
            };
        }

        debug!(elapsed_ms, response_preview = %truncate_for_log(&body, 300), "Classifier responded");
        let res = self.read_answer(&body);
        if let Err(e) = &res {
            info!(elapsed_ms, error = %e, "Classifier returned no text");
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    fn prompt() -> Prompt {
        Prompt {
            text: "Is it good?".to_string(),
            directive: "Act as an expert.".to_string(),
        }
    }

    fn client(server: &MockServer) -> EdenAiClient {
        let settings = ClassifierSettings {
            endpoint: server.url("/v2/text/chat"),
            ..ClassifierSettings::default()
        };
        EdenAiClient::new(Client::new(), "k3y", &settings)
    }

    fn fast_retry(max_attempts: usize) -> RetrySettings {
        RetrySettings {
            max_attempts,
            base_delay_secs: 0,
            max_delay_secs: 0,
            jitter_ms: 0,
        }
    }

    /// Replays canned results and counts calls.
    struct Scripted {
        results: RefCell<VecDeque<Result<String, ClassifyError>>>,
        calls: Cell<usize>,
    }

    impl Scripted {
        fn new(results: Vec<Result<String, ClassifyError>>) -> Self {
            Self {
                results: RefCell::new(results.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl Classify for Scripted {
        async fn classify(&self, _prompt: &Prompt) -> Result<String, ClassifyError> {
            self.calls.set(self.calls.get() + 1);
            self.results
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok("YES\nfine".to_string()))
        }
    }

    #[tokio::test]
    async fn test_posts_deterministic_payload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v2/text/chat")
                .header("authorization", "Bearer k3y")
                .json_body(json!({
                    "providers": "openai",
                    "text": "Is it good?",
                    "chat_global_action": "Act as an expert.",
                    "previous_history": [],
                    "temperature": 0.0,
                    "max_tokens": 150,
                    "settings": { "openai": "gpt-3.5-turbo" }
                }));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"openai": {"status": "success", "generated_text": "YES\nStrong demand."}}"#);
        });

        let text = client(&server).classify(&prompt()).await.unwrap();
        mock.assert();
        assert_eq!(text, "YES\nStrong demand.");
    }

    #[tokio::test]
    async fn test_provider_limitation_is_throttling() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/text/chat");
            then.status(200).body(
                r#"{"openai": {"status": "fail", "error": {"type": "ProviderLimitationError", "message": "Rate limit"}}}"#,
            );
        });

        let err = client(&server).classify(&prompt()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Throttled(ref m) if m == "Rate limit"));
    }

    #[tokio::test]
    async fn test_other_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/text/chat");
            then.status(200).body(
                r#"{"openai": {"status": "fail", "error": {"type": "ProviderInvalidInputTextError", "message": "bad"}}}"#,
            );
        });

        let err = client(&server).classify(&prompt()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Provider { ref kind, .. } if kind == "ProviderInvalidInputTextError"));
    }

    #[tokio::test]
    async fn test_http_429_is_throttling() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/text/chat");
            then.status(429).body("slow down");
        });

        let err = client(&server).classify(&prompt()).await.unwrap_err();
        assert!(err.is_throttled());
    }

    #[tokio::test]
    async fn test_missing_provider_entry_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/text/chat");
            then.status(200).body(r#"{"mistral": {"generated_text": "YES"}}"#);
        });

        let err = client(&server).classify(&prompt()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v2/text/chat");
            then.status(200).body("<html>oops</html>");
        });

        let err = client(&server).classify(&prompt()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_throttling() {
        let inner = Scripted::new(vec![
            Err(ClassifyError::Throttled("1".into())),
            Err(ClassifyError::Throttled("2".into())),
            Ok("NO\nbad".to_string()),
        ]);
        let retry = RetryClassify::new(&inner, &fast_retry(5));

        assert_eq!(retry.classify(&prompt()).await.unwrap(), "NO\nbad");
        assert_eq!(inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let inner = Scripted::new(
            (0..10)
                .map(|i| Err(ClassifyError::Throttled(i.to_string())))
                .collect(),
        );
        let retry = RetryClassify::new(&inner, &fast_retry(3));

        let err = retry.classify(&prompt()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::RetriesExhausted { attempts: 3 }));
        assert_eq!(inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_non_throttling_errors_are_not_retried() {
        let inner = Scripted::new(vec![Err(ClassifyError::MalformedResponse("x".into()))]);
        let retry = RetryClassify::new(&inner, &fast_retry(5));

        assert!(matches!(
            retry.classify(&prompt()).await,
            Err(ClassifyError::MalformedResponse(_))
        ));
        assert_eq!(inner.calls.get(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = RetrySettings {
            max_attempts: 10,
            base_delay_secs: 30,
            max_delay_secs: 100,
            jitter_ms: 0,
        };
        let retry = RetryClassify::new(Scripted::new(vec![]), &settings);
        assert_eq!(retry.delay_for(1), Duration::from_secs(30));
        assert_eq!(retry.delay_for(2), Duration::from_secs(60));
        assert_eq!(retry.delay_for(3), Duration::from_secs(100));
        assert_eq!(retry.delay_for(40), Duration::from_secs(100));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let settings = RetrySettings {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 10,
            jitter_ms: 250,
        };
        let retry = RetryClassify::new(Scripted::new(vec![]), &settings);
        for _ in 0..20 {
            let d = retry.delay_for(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }
}
