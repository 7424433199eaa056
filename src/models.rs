//! Data models flowing through one poll cycle.
//!
//! - [`Article`]: one candidate news item scraped from the feed
//! - [`DedupKey`]: the `(headline, ticker)` pair looked up in the store
//! - [`TermClassification`]: one sentiment verdict for one horizon
//! - [`AnalysisRecord`]: the merged short and long verdicts for a pair
//! - [`NewsRow`]: the wire shape of one stored row
//!
//! Everything here lives for a single cycle. The only state shared between
//! cycles is the store's key space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A news item scraped from one feed card.
///
/// Construction goes through [`Article::new`], which enforces a non-empty
/// headline and a non-empty set of non-blank tickers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// When the item was published, resolved from its relative age.
    pub timestamp: DateTime<Utc>,
    /// Every ticker the card mentions, trimmed and deduplicated.
    pub tickers: BTreeSet<String>,
    /// Trimmed headline text.
    pub headline: String,
}

impl Article {
    /// Build an article from raw scraped parts.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Publication instant
    /// * `tickers` - Ticker symbols, trimmed before use
    /// * `headline` - Headline text, trimmed before use
    ///
    /// # Returns
    ///
    /// `None` if the headline is blank, no tickers are given or any ticker
    /// is blank.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let article = Article::new(Utc::now(), ["TSLA"], "Recall announced").unwrap();
    /// assert_eq!(article.keys().count(), 1);
    /// ```
    pub fn new<I, S>(timestamp: DateTime<Utc>, tickers: I, headline: &str) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headline = headline.trim();
        if headline.is_empty() {
            return None;
        }

        let mut set = BTreeSet::new();
        for ticker in tickers {
            let ticker = ticker.as_ref().trim();
            if ticker.is_empty() {
                return None;
            }
            set.insert(ticker.to_string());
        }
        if set.is_empty() {
            return None;
        }

        Some(Self {
            timestamp,
            tickers: set,
            headline: headline.to_string(),
        })
    }

    /// One dedup key per ticker, in ticker order.
    pub fn keys(&self) -> impl Iterator<Item = DedupKey> + '_ {
        self.tickers.iter().map(|t| DedupKey {
            headline: self.headline.clone(),
            ticker: t.clone(),
        })
    }
}

/// Lookup key for "was this already processed".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub headline: String,
    pub ticker: String,
}

/// Analysis horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    /// Days to weeks.
    Short,
    /// Months and beyond.
    Long,
}

impl Term {
    /// Both horizons, in the order rows are written.
    pub const ALL: [Term; 2] = [Term::Short, Term::Long];

    /// Lowercase wire name, as stored and shown in alerts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Short => "short",
            Term::Long => "long",
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentiment verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Good news for the stock.
    Positive,
    /// Bad news for the stock.
    Negative,
    /// The model could not tell.
    Neutral,
}

impl Label {
    /// Map the classifier's answer token onto a label.
    ///
    /// `YES` is good news, `NO` is bad news, `UNKNOWN` is uncertain.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "YES" => Some(Label::Positive),
            "NO" => Some(Label::Negative),
            "UNKNOWN" => Some(Label::Neutral),
            _ => None,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Positive => "positive",
            Label::Negative => "negative",
            Label::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classifier verdict for one `(ticker, term, headline)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermClassification {
    pub term: Term,
    pub ticker: String,
    pub headline: String,
    pub label: Label,
    /// The model's reasoning, everything after the answer token.
    pub explanation: String,
}

/// Both horizons for one `(ticker, headline)` pair.
///
/// Only [`crate::analysis::aggregate`] builds these, and only when both halves
/// exist and agree on ticker and headline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub ticker: String,
    pub headline: String,
    pub short: TermClassification,
    pub long: TermClassification,
}

impl AnalysisRecord {
    /// The two store rows this record splits into, short first.
    pub fn rows(&self) -> [NewsRow; 2] {
        [NewsRow::from(&self.short), NewsRow::from(&self.long)]
    }
}

/// One row as posted to the store.
///
/// Field names match the store's JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsRow {
    pub term: Term,
    pub ticker: String,
    pub headline: String,
    pub explanation: String,
    /// The verdict, named `result` on the wire.
    pub result: Label,
}

impl From<&TermClassification> for NewsRow {
    fn from(c: &TermClassification) -> Self {
        Self {
            term: c.term,
            ticker: c.ticker.clone(),
            headline: c.headline.clone(),
            explanation: c.explanation.clone(),
            result: c.label,
        }
    }
}
