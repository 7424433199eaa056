//! Drop articles the store already knows about.
//!
//! The key is `(headline, ticker)`, so an article with several tickers is
//! checked once per ticker and keeps only the tickers that are new. A
//! headline already analyzed for one ticker is still analyzed for another.
//!
//! Lookups run one at a time. A failed lookup drops that pair for this cycle
//! rather than risk enriching and alerting on it twice.

use crate::models::{Article, DedupKey};
use crate::outputs::store::NewsStore;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, info, instrument};

/// Narrow `articles` to the pairs the store has no rows for.
///
/// Pairs repeated within `articles` are looked up and kept once. Articles
/// left with no tickers are dropped.
#[instrument(level = "info", skip_all, fields(candidates = articles.len()))]
pub async fn fresh_articles<S: NewsStore>(store: &S, articles: Vec<Article>) -> Vec<Article> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut candidates: Vec<(Article, Vec<DedupKey>)> = Vec::with_capacity(articles.len());
    for article in articles {
        let keys: Vec<DedupKey> = article.keys().filter(|k| seen.insert(k.clone())).collect();
        if keys.is_empty() {
            debug!(headline = %article.headline, "Duplicate within snapshot");
            continue;
        }
        candidates.push((article, keys));
    }

    let fresh: Vec<Article> = stream::iter(candidates)
        .then(|(article, keys)| async move {
            let mut tickers = BTreeSet::new();
            for key in keys {
                match store.count(&key).await {
                    Ok(0) => {
                        tickers.insert(key.ticker);
                    }
                    Ok(count) => {
                        debug!(ticker = %key.ticker, count, "Already processed");
                    }
                    Err(e) => {
                        error!(ticker = %key.ticker, error = %e, "Dedup lookup failed; skipping pair");
                    }
                }
            }
            (!tickers.is_empty()).then(|| Article { tickers, ..article })
        })
        .filter_map(std::future::ready)
        .collect()
        .await;

    info!(
        fresh = fresh.len(),
        pairs = fresh.iter().map(|a| a.tickers.len()).sum::<usize>(),
        "Found new articles"
    );
    fresh
}
