//! One pass over a feed snapshot.
//!
//! extract → dedup → enrich → persist → notify, strictly in that order for
//! each `(headline, ticker)` pair. Rows parked by an earlier partial write
//! are retried before any new work.

use crate::analysis::Enricher;
use crate::api::Classify;
use crate::dedup::fresh_articles;
use crate::models::Article;
use crate::outputs::store::{NewsStore, PersistOutcome, Persister};
use crate::outputs::telegram::{ChatSender, Notifier};
use crate::scrapers::extract::ArticleExtractor;
use itertools::Itertools;
use tracing::{debug, info, instrument};

/// Counts for one cycle, logged at the end of it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Valid articles read off the page, both strategies together.
    pub extracted: usize,
    /// `(headline, ticker)` pairs left after dedup.
    pub fresh_pairs: usize,
    /// Pairs with both terms classified.
    pub analyzed: usize,
    /// Records with both rows written.
    pub stored: usize,
    /// Records with one row written and the other pending.
    pub partial: usize,
    /// Chat messages delivered.
    pub alerts: usize,
}

/// Everything downstream of the feed session.
pub struct Pipeline<C, S, N> {
    extractor: ArticleExtractor,
    enricher: Enricher<C>,
    store: S,
    persister: Persister,
    notifier: Notifier<N>,
}

impl<C, S, N> Pipeline<C, S, N>
where
    C: Classify,
    S: NewsStore,
    N: ChatSender,
{
    /// Assemble a pipeline from its stages.
    ///
    /// # Arguments
    ///
    /// * `extractor` - Turns a page snapshot into articles
    /// * `enricher` - Classifies each pair for both terms
    /// * `store` - Used for dedup lookups and for persisting rows
    /// * `persister` - Owns the ledger of rows still to retry
    /// * `notifier` - Sends the chat alerts
    pub fn new(
        extractor: ArticleExtractor,
        enricher: Enricher<C>,
        store: S,
        persister: Persister,
        notifier: Notifier<N>,
    ) -> Self {
        Self {
            extractor,
            enricher,
            store,
            persister,
            notifier,
        }
    }

    /// The notifier, for status messages outside a cycle.
    pub fn notifier(&self) -> &Notifier<N> {
        &self.notifier
    }

    /// Run one full cycle over a page snapshot.
    ///
    /// Relative ages on the page are resolved against the current time.
    /// Nothing here fails: every per-article or per-pair problem is logged,
    /// skipped and reflected in the returned counts.
    ///
    /// # Arguments
    ///
    /// * `html` - The feed page as last loaded by the session
    ///
    /// # Returns
    ///
    /// A [`CycleReport`] with the counts for this cycle.
    pub async fn run_cycle(&mut self, html: &str) -> CycleReport {
        let articles = self.extractor.extract(html);
        self.process_snapshot(articles).await
    }

    /// Process `html` as if scraped at `now`.
    #[cfg(test)]
    pub async fn run_cycle_at(
        &mut self,
        html: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> CycleReport {
        let articles = self.extractor.extract_at(html, now);
        self.process_snapshot(articles).await
    }

    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    async fn process_snapshot(&mut self, articles: Vec<Article>) -> CycleReport {
        let mut report = CycleReport {
            extracted: articles.len(),
            ..CycleReport::default()
        };

        self.persister.retry_pending(&self.store).await;

        let fresh = fresh_articles(&self.store, articles).await;
        report.fresh_pairs = fresh.iter().map(|a| a.tickers.len()).sum();

        for article in &fresh {
            self.process_article(article, &mut report).await;
        }

        info!(
            extracted = report.extracted,
            fresh_pairs = report.fresh_pairs,
            analyzed = report.analyzed,
            stored = report.stored,
            partial = report.partial,
            alerts = report.alerts,
            pending = self.persister.pending_len(),
            "Cycle complete"
        );
        report
    }

    async fn process_article(&mut self, article: &Article, report: &mut CycleReport) {
        debug!(
            tickers = %article.tickers.iter().join(","),
            headline = %article.headline,
            published = %article.timestamp,
            "Processing article"
        );
        for key in article.keys() {
            let Some(record) = self.enricher.enrich(&key).await else {
                continue;
            };
            report.analyzed += 1;

            match self.persister.persist(&self.store, &record).await {
                PersistOutcome::Stored => report.stored += 1,
                PersistOutcome::Partial => report.partial += 1,
                PersistOutcome::Failed => {}
            }

            // Alerts do not depend on the persist outcome.
            report.alerts += self.notifier.notify(&record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::CannedClassifier;
    use crate::config::SelectorSettings;
    use crate::models::{Label, Term};
    use crate::outputs::store::tests::MemoryStore;
    use crate::outputs::telegram::tests::RecordingChat;
    use crate::scrapers::extract::tests::{anchored_card, feed_page, plain_card};
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn pipeline<'a>(
        classifier: &'a CannedClassifier,
        store: &'a MemoryStore,
        chat: &'a RecordingChat,
    ) -> Pipeline<&'a CannedClassifier, &'a MemoryStore, &'a RecordingChat> {
        Pipeline::new(
            ArticleExtractor::from_settings(&SelectorSettings::default()).unwrap(),
            Enricher::new(classifier),
            store,
            Persister::new(5),
            Notifier::new(chat),
        )
    }

    fn tsla_classifier() -> CannedClassifier {
        CannedClassifier::default()
            .with("TSLA", Term::Short, "YES\nOld news already priced in.")
            .with("TSLA", Term::Long, "NO\nRecall costs hurt margins.")
    }

    #[tokio::test]
    async fn test_end_to_end_single_article() {
        let classifier = tsla_classifier();
        let store = MemoryStore::default();
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[anchored_card(&["TSLA"], "10m ago", "Recall announced")]);
        let report = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(report.fresh_pairs, 1);
        assert_eq!(report.analyzed, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(report.alerts, 2);

        let rows = store.rows.borrow();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].term, rows[0].result), (Term::Short, Label::Positive));
        assert_eq!((rows[1].term, rows[1].result), (Term::Long, Label::Negative));
        assert!(rows.iter().all(|r| r.ticker == "TSLA" && r.headline == "Recall announced"));

        let sent = chat.sent.borrow();
        assert!(sent[0].contains("Result: *positive*\nTerm: short"));
        assert!(sent[1].contains("Result: *negative*\nTerm: long"));
    }

    #[tokio::test]
    async fn test_second_cycle_skips_known_pairs() {
        let classifier = tsla_classifier();
        let store = MemoryStore::default();
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[anchored_card(&["TSLA"], "10m ago", "Recall announced")]);
        pipeline.run_cycle_at(&page, now()).await;
        let report = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(report.fresh_pairs, 0);
        assert_eq!(classifier.prompts.borrow().len(), 2);
        assert_eq!(store.rows.borrow().len(), 2);
        assert_eq!(chat.sent.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_card_is_skipped() {
        let classifier = tsla_classifier();
        let store = MemoryStore::default();
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[
            plain_card(Some("AAPL"), "3x ago", "Broken"),
            anchored_card(&["TSLA"], "10m ago", "Recall announced"),
        ]);
        let report = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(report.analyzed, 1);
    }

    #[tokio::test]
    async fn test_failed_classification_stores_and_sends_nothing() {
        let classifier = CannedClassifier::default().with("TSLA", Term::Short, "MAYBE\nHard to say.");
        let store = MemoryStore::default();
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[anchored_card(&["TSLA"], "10m ago", "Recall announced")]);
        let report = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(report.fresh_pairs, 1);
        assert_eq!(report.analyzed, 0);
        assert!(store.rows.borrow().is_empty());
        assert!(chat.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_neutral_pair_is_stored_but_silent() {
        let classifier = CannedClassifier::default()
            .with("AAPL", Term::Short, "UNKNOWN\nNo signal.")
            .with("AAPL", Term::Long, "UNKNOWN\nNo signal.");
        let store = MemoryStore::default();
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[plain_card(Some("AAPL"), "1h ago", "Board meeting")]);
        let report = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(report.stored, 1);
        assert_eq!(report.alerts, 0);
        assert_eq!(store.rows.borrow().len(), 2);
        assert!(chat.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_partial_write_is_finished_next_cycle() {
        let classifier = tsla_classifier();
        let store = MemoryStore::default();
        store.fail_terms.borrow_mut().insert(Term::Long);
        let chat = RecordingChat::default();
        let mut pipeline = pipeline(&classifier, &store, &chat);

        let page = feed_page(&[anchored_card(&["TSLA"], "10m ago", "Recall announced")]);
        let first = pipeline.run_cycle_at(&page, now()).await;
        assert_eq!(first.partial, 1);
        assert_eq!(store.rows.borrow().len(), 1);

        store.fail_terms.borrow_mut().clear();
        let second = pipeline.run_cycle_at(&page, now()).await;

        assert_eq!(second.fresh_pairs, 0);
        let rows = store.rows.borrow();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].term, Term::Long);
        assert_eq!(classifier.prompts.borrow().len(), 2);
    }
}
