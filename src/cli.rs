//! Command-line interface definitions for Quantex News.
//!
//! Secrets and endpoints can be given as flags or through the `QUANTEX_*`
//! environment variables. Non-secret tuning lives in the optional YAML file
//! passed with `--config`, see [`crate::config`].

use clap::Parser;
use std::fmt;
use std::time::Duration;

/// Command-line arguments for the Quantex News poller.
///
/// # Examples
///
/// ```sh
/// # Everything from the environment
/// QUANTEX_NEWSFILTER_USER=me@example.com QUANTEX_NEWSFILTER_PASSWORD=... \
/// QUANTEX_EDENAI_API_KEY=... QUANTEX_TELEGRAM_BOT_API_KEY=... \
/// QUANTEX_TELEGRAM_CHAT_ID=-100123 QUANTEX_SECRET_KEY=... quantex_news
///
/// # One cycle against a local store, with tuning from a file
/// quantex_news --once --config quantex.yaml --api-url http://localhost:8000/api/news
/// ```
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Login email for the news feed
    #[arg(long, env = "QUANTEX_NEWSFILTER_USER")]
    pub newsfilter_user: String,

    /// Login password for the news feed
    #[arg(long, env = "QUANTEX_NEWSFILTER_PASSWORD", hide_env_values = true)]
    pub newsfilter_password: String,

    /// API key for the sentiment classifier
    #[arg(long, env = "QUANTEX_EDENAI_API_KEY", hide_env_values = true)]
    pub edenai_api_key: String,

    /// Telegram bot token
    #[arg(long, env = "QUANTEX_TELEGRAM_BOT_API_KEY", hide_env_values = true)]
    pub telegram_bot_api_key: String,

    /// Telegram chat that receives alerts. Group chat ids are negative.
    #[arg(long, env = "QUANTEX_TELEGRAM_CHAT_ID", allow_hyphen_values = true)]
    pub telegram_chat_id: String,

    /// Shared secret sent to the news store
    #[arg(long, env = "QUANTEX_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Seconds to sleep between polls
    #[arg(short, long, env = "QUANTEX_INTERVAL", default_value_t = 30)]
    pub interval: u64,

    /// News store endpoint
    #[arg(long, env = "QUANTEX_API_URL", default_value = "http://localhost:8000/api/news")]
    pub api_url: String,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "QUANTEX_CONFIG")]
    pub config: Option<String>,

    /// Run a single cycle and exit
    #[arg(long, conflicts_with = "max_cycles")]
    pub once: bool,

    /// Stop after this many cycles (at least 1)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_cycles: Option<u64>,
}

impl Cli {
    /// Sleep between the end of one cycle and the next reload.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Cycle limit, folding `--once` into `--max-cycles 1`.
    pub fn cycle_limit(&self) -> Option<u64> {
        if self.once { Some(1) } else { self.max_cycles }
    }
}

impl fmt::Debug for Cli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cli")
            .field("newsfilter_user", &self.newsfilter_user)
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("interval", &self.interval)
            .field("api_url", &self.api_url)
            .field("config", &self.config)
            .field("once", &self.once)
            .field("max_cycles", &self.max_cycles)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 13] = [
        "quantex_news",
        "--newsfilter-user",
        "me@example.com",
        "--newsfilter-password",
        "pw",
        "--edenai-api-key",
        "eden",
        "--telegram-bot-api-key",
        "bot",
        "--telegram-chat-id",
        "-100123",
        "--secret-key",
        "s3cret",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn test_cli_parsing() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.newsfilter_user, "me@example.com");
        assert_eq!(cli.telegram_chat_id, "-100123");
        assert_eq!(cli.secret_key, "s3cret");
        assert!(!cli.once);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = parse(&["-i", "5", "-c", "/tmp/quantex.yaml"]).unwrap();
        assert_eq!(cli.interval(), Duration::from_secs(5));
        assert_eq!(cli.config.as_deref(), Some("/tmp/quantex.yaml"));
    }

    #[test]
    fn test_once_means_one_cycle() {
        assert_eq!(parse(&["--once"]).unwrap().cycle_limit(), Some(1));
        assert_eq!(parse(&["--max-cycles", "3"]).unwrap().cycle_limit(), Some(3));
        assert!(parse(&["--once", "--max-cycles", "3"]).is_err());
    }

    #[test]
    fn test_zero_max_cycles_is_rejected() {
        let err = parse(&["--max-cycles", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", parse(&[]).unwrap());
        assert!(rendered.contains("me@example.com"));
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("eden"));
    }
}
