//! # Quantex News
//!
//! Polls a logged-in financial news feed, asks a language model whether each
//! new headline is good or bad for each ticker it mentions over the short and
//! the long term, stores the verdicts and sends chat alerts.
//!
//! ## Usage
//!
//! ```sh
//! quantex_news --config quantex.yaml
//! quantex_news --once
//! ```
//!
//! ## Architecture
//!
//! The application is one long-running loop over a pipeline:
//! 1. **Session**: log in once, then force a fresh page reload every cycle
//! 2. **Extraction**: parse feed cards into articles with two selector strategies
//! 3. **Dedup**: drop `(headline, ticker)` pairs the store already has
//! 4. **Enrichment**: classify each pair for the short and the long term
//! 5. **Output**: persist one row per term and send alerts for non-neutral pairs
//!
//! Only a session failure stops the loop; everything else is logged and the
//! affected pair skipped.

use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod analysis;
mod api;
mod cli;
mod config;
mod dedup;
mod error;
mod models;
mod outputs;
mod pipeline;
mod poller;
mod scrapers;
mod timestamp;
mod utils;

use analysis::Enricher;
use api::{EdenAiClient, RetryClassify};
use cli::Cli;
use config::{Settings, validate_url};
use outputs::store::{Persister, QuantexApi};
use outputs::telegram::{Notifier, TelegramBot};
use pipeline::Pipeline;
use poller::{PollSettings, Poller};
use scrapers::Credentials;
use scrapers::extract::ArticleExtractor;
use scrapers::newsfilter::HttpFeedSession;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("quantex_news starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Load config ----
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(path = ?args.config, error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    validate_url("api_url", &args.api_url)?;

    // ---- Build collaborators ----
    let http = Client::builder().timeout(Duration::from_secs(60)).build()?;

    let session = HttpFeedSession::new(&settings.feed)?;
    let extractor = ArticleExtractor::from_settings(&settings.selectors)?;
    let classifier = RetryClassify::new(
        EdenAiClient::new(http.clone(), &args.edenai_api_key, &settings.classifier),
        &settings.retry,
    );
    let store = QuantexApi::new(http.clone(), &args.api_url, &args.secret_key);
    let bot = TelegramBot::new(
        http,
        &settings.chat.api_base,
        &args.telegram_bot_api_key,
        &args.telegram_chat_id,
    );
    info!(
        feed = %settings.feed.url,
        api_url = %args.api_url,
        provider = %settings.classifier.provider,
        model = %settings.classifier.model,
        "Collaborators ready"
    );

    let pipeline = Pipeline::new(
        extractor,
        Enricher::new(classifier),
        store,
        Persister::new(settings.persist.max_pending_attempts),
        Notifier::new(bot),
    );
    let credentials = Credentials {
        email: args.newsfilter_user.clone(),
        password: args.newsfilter_password.clone(),
    };
    let poll_settings = PollSettings {
        interval: args.interval(),
        auth_settle: settings.feed.auth_settle(),
        reload_settle: settings.feed.reload_settle(),
        announce_sleep: settings.chat.announce_sleep,
        max_cycles: args.cycle_limit(),
    };

    // ---- Poll ----
    let mut poller = Poller::new(session, credentials, pipeline, poll_settings);
    let result = poller.run().await;

    let elapsed = start_time.elapsed();
    match result {
        Ok(()) => {
            info!(?elapsed, cycles = poller.cycles(), "Execution complete");
            Ok(())
        }
        Err(e) => {
            error!(
                ?elapsed,
                cycles = poller.cycles(),
                state = %poller.state(),
                error = ?e,
                "Poller stopped on a fatal session error"
            );
            Err(e.into())
        }
    }
}
