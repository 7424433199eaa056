//! Feed snapshot to [`Article`] extraction.
//!
//! The feed serves two structurally different card layouts. Each layout has
//! its own [`SelectorStrategy`]; every strategy runs over every card of a
//! snapshot and the results are concatenated, strategy by strategy. A card
//! only matches the strategy for its own layout, but the same story can show
//! up twice across layouts, so callers must tolerate duplicates.
//!
//! # Rejected cards
//!
//! A card is skipped when it has no tickers, any ticker is blank, the
//! timestamp or headline is missing, or the timestamp does not parse.

use crate::config::{SelectorSettings, StrategySelectors};
use crate::error::{ConfigError, TimestampError};
use crate::models::Article;
use crate::timestamp;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

/// Parse one CSS selector, naming it in the error.
pub fn parse_selector(name: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::Selector {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Compiled selectors for one card layout.
#[derive(Debug, Clone)]
pub struct SelectorStrategy {
    pub name: String,
    tickers: Selector,
    timestamp: Selector,
    headline: Selector,
    drop_last_ticker: bool,
}

impl SelectorStrategy {
    /// Parse the selectors of one layout. Errors name `<strategy>.<field>`.
    pub fn compile(raw: &StrategySelectors) -> Result<Self, ConfigError> {
        Ok(Self {
            name: raw.name.clone(),
            tickers: parse_selector(&format!("{}.tickers", raw.name), &raw.tickers)?,
            timestamp: parse_selector(&format!("{}.timestamp", raw.name), &raw.timestamp)?,
            headline: parse_selector(&format!("{}.headline", raw.name), &raw.headline)?,
            drop_last_ticker: raw.drop_last_ticker,
        })
    }

    /// Read one card. `None` means the card is not a valid article for this layout.
    fn extract_card<R>(&self, card: ElementRef<'_>, resolve: &R) -> Option<Article>
    where
        R: Fn(&str) -> Result<DateTime<Utc>, TimestampError>,
    {
        let mut tickers: Vec<String> = card.select(&self.tickers).map(element_text).collect();
        if self.drop_last_ticker {
            tickers.pop();
        }
        if tickers.is_empty() {
            debug!(strategy = %self.name, "No tickers scraped");
            return None;
        }
        if tickers.iter().any(|t| t.trim().is_empty()) {
            debug!(strategy = %self.name, ?tickers, "Blank ticker scraped");
            return None;
        }

        let Some(raw_timestamp) = first_text(card, &self.timestamp) else {
            debug!(strategy = %self.name, "Missing timestamp");
            return None;
        };
        let Some(headline) = first_text(card, &self.headline) else {
            debug!(strategy = %self.name, "Missing headline");
            return None;
        };

        let timestamp = match resolve(&raw_timestamp) {
            Ok(ts) => ts,
            Err(e) => {
                debug!(strategy = %self.name, error = %e, "Invalid timestamp");
                return None;
            }
        };

        let article = Article::new(timestamp, &tickers, &headline)?;
        debug!(strategy = %self.name, ?tickers, headline = %article.headline, "Scraped article");
        Some(article)
    }
}

/// Turns a feed page into articles using every configured strategy.
#[derive(Debug, Clone)]
pub struct ArticleExtractor {
    feed_item: Selector,
    strategies: Vec<SelectorStrategy>,
}

impl ArticleExtractor {
    /// Compile every configured selector up front.
    ///
    /// # Arguments
    ///
    /// * `settings` - The card selector and one entry per strategy, in the
    ///   order their results are emitted
    ///
    /// # Errors
    ///
    /// [`ConfigError::Selector`] naming the first selector that fails to parse.
    pub fn from_settings(settings: &SelectorSettings) -> Result<Self, ConfigError> {
        let strategies = settings
            .strategies
            .iter()
            .map(SelectorStrategy::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            feed_item: parse_selector("feed_item", &settings.feed_item)?,
            strategies,
        })
    }

    /// Extract, resolving relative ages against the current time.
    pub fn extract(&self, html: &str) -> Vec<Article> {
        self.extract_with(html, &timestamp::convert)
    }

    /// Extract against a fixed `now`.
    #[cfg(test)]
    pub fn extract_at(&self, html: &str, now: DateTime<Utc>) -> Vec<Article> {
        self.extract_with(html, &|raw: &str| timestamp::convert_at(raw, now))
    }

    #[instrument(level = "info", skip_all, fields(bytes = html.len()))]
    fn extract_with<R>(&self, html: &str, resolve: &R) -> Vec<Article>
    where
        R: Fn(&str) -> Result<DateTime<Utc>, TimestampError>,
    {
        let document = Html::parse_document(html);
        let cards: Vec<ElementRef<'_>> = document.select(&self.feed_item).collect();

        let mut articles = Vec::new();
        for strategy in &self.strategies {
            let before = articles.len();
            articles.extend(cards.iter().filter_map(|card| strategy.extract_card(*card, resolve)));
            info!(
                strategy = %strategy.name,
                cards = cards.len(),
                count = articles.len() - before,
                "Scraped articles"
            );
        }

        if articles.is_empty() {
            warn!(cards = cards.len(), "No articles scraped");
        }
        articles
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    /// Card in the anchored layout. The last ticker span is the badge.
    pub(crate) fn anchored_card(tickers: &[&str], timestamp: &str, headline: &str) -> String {
        let spans: String = tickers
            .iter()
            .map(|t| format!("<span>{t}</span>"))
            .chain(std::iter::once("<span>+</span>".to_string()))
            .collect();
        format!(
            "<div><a href=\"/n/1\"><div>\
             <div><div><span>{timestamp}</span></div></div>\
             <div><div>{spans}</div></div>\
             <div><div><span>{headline}</span><span>source</span></div></div>\
             </div></a></div>"
        )
    }

    /// Card in the plain layout, carrying a single ticker.
    pub(crate) fn plain_card(ticker: Option<&str>, timestamp: &str, headline: &str) -> String {
        let ticker = ticker
            .map(|t| format!("<span>{t}</span>"))
            .unwrap_or_default();
        format!(
            "<div><div><div>\
             <div><div><span>{timestamp}</span></div></div>\
             <div><div>{ticker}</div></div>\
             <div><div><span>{headline}</span></div></div>\
             </div></div></div>"
        )
    }

    /// Wrap cards in the page skeleton the default feed selector expects.
    pub(crate) fn feed_page(cards: &[String]) -> String {
        format!(
            "<html><body><div>\
             <div>header</div>\
             <div><div>a</div><div>b</div><div>c</div>\
             <div><div><div><div>{}</div></div></div></div>\
             </div>\
             </div></body></html>",
            cards.concat()
        )
    }

    fn extractor() -> ArticleExtractor {
        ArticleExtractor::from_settings(&SelectorSettings::default()).unwrap()
    }

    #[test]
    fn test_well_formed_anchored_card() {
        let page = feed_page(&[anchored_card(&["AAPL"], "1h ago", "X")]);
        let articles = extractor().extract_at(&page, now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].headline, "X");
        assert_eq!(articles[0].tickers.iter().collect::<Vec<_>>(), vec!["AAPL"]);
        assert_eq!(articles[0].timestamp, now() - Duration::hours(1));
    }

    #[test]
    fn test_well_formed_plain_card() {
        let page = feed_page(&[plain_card(Some("AAPL"), "1h ago", "X")]);
        let articles = extractor().extract_at(&page, now());
        assert_eq!(articles.len(), 1);
        assert!(articles[0].tickers.contains("AAPL"));
    }

    #[test]
    fn test_extract_resolves_against_now() {
        let page = feed_page(&[anchored_card(&["AAPL"], "5m ago", "X")]);
        let before = Utc::now();
        let articles = extractor().extract(&page);
        let after = Utc::now();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].timestamp >= before - Duration::minutes(5));
        assert!(articles[0].timestamp <= after - Duration::minutes(5));
    }

    #[test]
    fn test_multiple_tickers_anchored() {
        let page = feed_page(&[anchored_card(&["AAPL", "MSFT"], "2d ago", "Deal")]);
        let articles = extractor().extract_at(&page, now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].tickers.len(), 2);
    }

    #[test]
    fn test_card_without_tickers_is_skipped() {
        let page = feed_page(&[
            anchored_card(&[], "1h ago", "X"),
            plain_card(None, "1h ago", "Y"),
        ]);
        assert!(extractor().extract_at(&page, now()).is_empty());
    }

    #[test]
    fn test_blank_tickers_are_skipped() {
        let page = feed_page(&[
            anchored_card(&[""], "1h ago", "X"),
            anchored_card(&[" "], "1h ago", "Y"),
            plain_card(Some(" "), "1h ago", "Z"),
        ]);
        assert!(extractor().extract_at(&page, now()).is_empty());
    }

    #[test]
    fn test_bad_timestamp_skips_only_that_card() {
        let page = feed_page(&[
            anchored_card(&["AAPL"], "3x ago", "Bad"),
            anchored_card(&["MSFT"], "5m ago", "Good"),
        ]);
        let articles = extractor().extract_at(&page, now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].headline, "Good");
    }

    #[test]
    fn test_missing_headline_is_skipped() {
        let page = feed_page(&[anchored_card(&["AAPL"], "1h ago", "")]);
        assert!(extractor().extract_at(&page, now()).is_empty());
    }

    #[test]
    fn test_strategies_concatenate_in_order() {
        let page = feed_page(&[
            plain_card(Some("TSLA"), "10m ago", "Plain first in page"),
            anchored_card(&["AAPL"], "1h ago", "Anchored second in page"),
        ]);
        let articles = extractor().extract_at(&page, now());
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].headline, "Anchored second in page");
        assert_eq!(articles[1].headline, "Plain first in page");
    }

    #[test]
    fn test_empty_page() {
        assert!(extractor().extract_at("<html><body></body></html>", now()).is_empty());
    }

    #[test]
    fn test_invalid_selector_is_a_config_error() {
        let mut settings = SelectorSettings::default();
        settings.feed_item = "div[[".to_string();
        assert!(matches!(
            ArticleExtractor::from_settings(&settings),
            Err(ConfigError::Selector { .. })
        ));
    }
}
