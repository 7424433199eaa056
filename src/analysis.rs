//! Sentiment enrichment and short/long aggregation.
//!
//! For every fresh `(headline, ticker)` pair the [`Enricher`] asks the
//! classifier twice, once per [`Term`], and [`aggregate`] merges the two
//! verdicts into an [`AnalysisRecord`]. A pair with a missing or
//! inconsistent half is dropped whole.

use crate::api::{Classify, Prompt};
use crate::error::ClassifyError;
use crate::models::{AnalysisRecord, DedupKey, Label, Term, TermClassification};
use crate::utils::{trim_formatting, truncate_for_log};
use tracing::{debug, error, info, instrument};

const DIRECTIVE: &str =
    "Act as a financial expert. You are a financial expert with stock recommendation experience.";

/// Build the question for one `(ticker, term, headline)`.
pub fn build_prompt(ticker: &str, term: Term, headline: &str) -> Prompt {
    Prompt {
        text: format!(
            "Answer \"YES\" if good news, \"NO\" if bad news, or \"UNKNOWN\" if uncertain in the first line. \
             Then elaborate with one short and concise sentence on the next line. \
             Is this headline good or bad for the stock price of {ticker} in the {term} term? \
             Headline: {headline}"
        ),
        directive: DIRECTIVE.to_string(),
    }
}

/// Split a classifier answer into its label and explanation.
///
/// The answer token comes first, followed either by a newline or by a dash
/// on the same line: both `"YES\nReason."` and `"YES - Reason."` parse.
pub fn parse_answer(text: &str) -> Result<(Label, String), ClassifyError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ClassifyError::MalformedResponse("empty answer".to_string()));
    }

    let end = text
        .find(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | ',' | '.'))
        .unwrap_or(text.len());
    let (raw_token, rest) = text.split_at(end);
    let token = raw_token.trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '*'));

    let label = Label::from_token(token)
        .ok_or_else(|| ClassifyError::UnrecognizedClassification(token.to_string()))?;

    Ok((label, trim_formatting(rest).to_string()))
}

/// Merge the two halves of a pair.
///
/// Returns `None` unless both halves are present, carry the right terms and
/// refer to the same ticker and headline.
pub fn aggregate(
    short: Option<TermClassification>,
    long: Option<TermClassification>,
) -> Option<AnalysisRecord> {
    let (short, long) = match (short, long) {
        (Some(s), Some(l)) => (s, l),
        (s, l) => {
            error!(
                has_short = s.is_some(),
                has_long = l.is_some(),
                "Incomplete classification pair; discarding"
            );
            return None;
        }
    };

    if short.term != Term::Short || long.term != Term::Long {
        error!(short = %short.term, long = %long.term, "Classification terms swapped; discarding");
        return None;
    }
    if short.ticker != long.ticker || short.headline != long.headline {
        error!(
            short_ticker = %short.ticker,
            long_ticker = %long.ticker,
            "Classification halves refer to different items; discarding"
        );
        return None;
    }

    Some(AnalysisRecord {
        ticker: short.ticker.clone(),
        headline: short.headline.clone(),
        short,
        long,
    })
}

/// Asks the classifier about one pair at a time.
pub struct Enricher<C> {
    classifier: C,
}

impl<C: Classify> Enricher<C> {
    /// Wrap a classifier, usually a [`crate::api::RetryClassify`].
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }

    /// Classify one `(ticker, term, headline)`.
    #[instrument(level = "info", skip_all, fields(%ticker, %term, headline = %truncate_for_log(headline, 80)))]
    pub async fn classify(
        &self,
        ticker: &str,
        term: Term,
        headline: &str,
    ) -> Result<TermClassification, ClassifyError> {
        let prompt = build_prompt(ticker, term, headline);
        let text = self.classifier.classify(&prompt).await?;
        let (label, explanation) = parse_answer(&text).inspect_err(|e| {
            error!(error = %e, response_preview = %truncate_for_log(&text, 200), "Invalid result");
        })?;
        debug!(%label, "Classified");

        Ok(TermClassification {
            term,
            ticker: ticker.to_string(),
            headline: headline.to_string(),
            label,
            explanation,
        })
    }

    /// Classify both terms for a pair and merge them.
    ///
    /// The long-term request is skipped once the short-term one has failed,
    /// since the pair is unusable either way.
    pub async fn enrich(&self, key: &DedupKey) -> Option<AnalysisRecord> {
        let mut halves = [None, None];
        for (slot, term) in halves.iter_mut().zip(Term::ALL) {
            match self.classify(&key.ticker, term, &key.headline).await {
                Ok(c) => *slot = Some(c),
                Err(e) => {
                    error!(ticker = %key.ticker, %term, error = %e, "Classification failed; dropping pair");
                    break;
                }
            }
        }
        let [short, long] = halves;
        let record = aggregate(short, long)?;
        info!(
            ticker = %record.ticker,
            short = %record.short.label,
            long = %record.long.label,
            "Analyzed headline"
        );
        Some(record)
    }
}
