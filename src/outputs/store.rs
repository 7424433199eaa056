//! The news store: dedup lookups and row persistence.
//!
//! # Wire format
//!
//! ```text
//! GET  {api_url}?headline=..&ticker=..   -> {"count": 0, "news": [...]}
//! POST {api_url}  {term, ticker, headline, explanation, result} -> {"status": "ok"}
//! ```
//!
//! Every request carries the shared secret in the `x-secret` header.
//!
//! # Partial writes
//!
//! Each [`AnalysisRecord`] becomes two rows, short then long. The two writes
//! are not atomic, so a row that fails is parked in the [`Persister`]'s
//! pending ledger and retried on later passes. The row that did succeed is
//! never written again.

use crate::error::StoreError;
use crate::models::{AnalysisRecord, DedupKey, NewsRow};
use crate::utils::truncate_for_log;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, error, info, instrument, warn};

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-secret";

/// The two store operations the pipeline needs.
pub trait NewsStore {
    /// Number of rows already stored for the key.
    ///
    /// Zero means the pair has never been processed.
    async fn count(&self, key: &DedupKey) -> Result<u64, StoreError>;

    /// Store one row.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unauthorized`] when the secret is rejected, otherwise
    /// [`StoreError::Api`] or [`StoreError::Http`].
    async fn insert(&self, row: &NewsRow) -> Result<(), StoreError>;
}

impl<T: NewsStore> NewsStore for &T {
    async fn count(&self, key: &DedupKey) -> Result<u64, StoreError> {
        (**self).count(key).await
    }

    async fn insert(&self, row: &NewsRow) -> Result<(), StoreError> {
        (**self).insert(row).await
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// REST client for the store API.
pub struct QuantexApi {
    client: Client,
    api_url: String,
    secret: String,
}

impl fmt::Debug for QuantexApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantexApi")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl QuantexApi {
    /// Create a client for the store endpoint.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `api_url` - The news collection URL, used for both lookups and inserts
    /// * `secret` - Value of the `x-secret` header
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = QuantexApi::new(Client::new(), "http://localhost:8000/api/news", &secret);
    /// let known = store.count(&key).await? > 0;
    /// ```
    pub fn new(client: Client, api_url: &str, secret: &str) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            secret: secret.to_string(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }
        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: error_body(resp.text().await),
            });
        }
        Ok(resp)
    }
}

/// Body of an error response, or why it could not be read.
fn error_body<E: fmt::Display>(body: Result<String, E>) -> String {
    match body {
        Ok(body) => truncate_for_log(&body, 300),
        Err(e) => {
            warn!(error = %e, "Could not read store error body");
            format!("<unreadable body: {e}>")
        }
    }
}

impl NewsStore for QuantexApi {
    #[instrument(level = "debug", skip_all, fields(ticker = %key.ticker))]
    async fn count(&self, key: &DedupKey) -> Result<u64, StoreError> {
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[("headline", key.headline.as_str()), ("ticker", key.ticker.as_str())])
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await?;
        let body: CountResponse = Self::check(resp).await?.json().await?;
        debug!(count = body.count, "Store lookup");
        Ok(body.count)
    }

    #[instrument(level = "debug", skip_all, fields(ticker = %row.ticker, term = %row.term))]
    async fn insert(&self, row: &NewsRow) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(&self.api_url)
            .header(SECRET_HEADER, &self.secret)
            .json(row)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRow {
    row: NewsRow,
    attempts: u32,
}

/// What happened to one record's two rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Both rows landed.
    Stored,
    /// Exactly one row landed; the other is pending.
    Partial,
    /// Neither row landed.
    Failed,
}

/// Writes records to the store and owns the ledger of rows still to retry.
#[derive(Debug)]
pub struct Persister {
    pending: Vec<PendingRow>,
    max_pending_attempts: u32,
}

impl Persister {
    /// Create a persister with an empty ledger.
    ///
    /// A parked row is dropped once its write has failed
    /// `max_pending_attempts` times, the original write included. It is
    /// always retried at least once.
    pub fn new(max_pending_attempts: u32) -> Self {
        Self {
            pending: Vec::new(),
            max_pending_attempts: max_pending_attempts.max(1),
        }
    }

    /// Rows waiting for another attempt.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Retry every parked row once, dropping those out of attempts.
    #[instrument(level = "info", skip_all, fields(pending = self.pending.len()))]
    pub async fn retry_pending<S: NewsStore>(&mut self, store: &S) {
        if self.pending.is_empty() {
            return;
        }

        let mut still_pending = Vec::new();
        for mut pending in std::mem::take(&mut self.pending) {
            match store.insert(&pending.row).await {
                Ok(()) => {
                    info!(ticker = %pending.row.ticker, term = %pending.row.term, "Pending row stored");
                }
                Err(e) => {
                    pending.attempts += 1;
                    if pending.attempts >= self.max_pending_attempts {
                        error!(
                            ticker = %pending.row.ticker,
                            term = %pending.row.term,
                            attempts = pending.attempts,
                            error = %e,
                            "Giving up on pending row"
                        );
                    } else {
                        warn!(
                            ticker = %pending.row.ticker,
                            term = %pending.row.term,
                            attempts = pending.attempts,
                            error = %e,
                            "Pending row still failing"
                        );
                        still_pending.push(pending);
                    }
                }
            }
        }
        self.pending = still_pending;
    }

    /// Write both rows of a record, short first.
    ///
    /// When nothing lands the record is simply lost for this cycle and the
    /// article surfaces again next cycle. When one row lands the other is
    /// parked, because the store will now report the pair as known.
    #[instrument(level = "info", skip_all, fields(ticker = %record.ticker))]
    pub async fn persist<S: NewsStore>(&mut self, store: &S, record: &AnalysisRecord) -> PersistOutcome {
        let mut failed = Vec::new();
        let rows = record.rows();
        for row in &rows {
            if let Err(e) = store.insert(row).await {
                error!(term = %row.term, error = %e, "Failed to persist row");
                failed.push(row.clone());
            }
        }

        match failed.len() {
            0 => PersistOutcome::Stored,
            n if n == rows.len() => PersistOutcome::Failed,
            _ => {
                for row in failed {
                    warn!(term = %row.term, "Parking row for retry");
                    self.pending.push(PendingRow { row, attempts: 1 });
                }
                PersistOutcome::Partial
            }
        }
    }
}
