//! Chat alerts for analyzed headlines.
//!
//! One [`AnalysisRecord`] yields:
//!
//! | short | long | messages |
//! |-------|------|----------|
//! | neutral | neutral | none |
//! | same label | same label | one combined message |
//! | different | different | one per term |
//!
//! Delivery failures are logged and never retried.

use crate::error::ChatError;
use crate::models::{AnalysisRecord, Label, TermClassification};
use crate::utils::{trim_formatting, truncate_for_log};
use reqwest::Client;
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, error, info, instrument};

/// Something that can post a text message to the alert channel.
pub trait ChatSender {
    /// Post `text`, formatted as legacy Telegram Markdown.
    ///
    /// # Errors
    ///
    /// [`ChatError::Api`] on a non-success status, [`ChatError::Http`] when
    /// the request itself fails.
    async fn send(&self, text: &str) -> Result<(), ChatError>;
}

impl<T: ChatSender> ChatSender for &T {
    async fn send(&self, text: &str) -> Result<(), ChatError> {
        (**self).send(text).await
    }
}

/// Telegram Bot API `sendMessage` client bound to one chat.
pub struct TelegramBot {
    client: Client,
    api_url: String,
    chat_id: String,
}

impl fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramBot")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl TelegramBot {
    /// Bind a bot token to one chat.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared `reqwest` client
    /// * `api_base` - Bot API root, e.g. `https://api.telegram.org`
    /// * `token` - Bot token from BotFather
    /// * `chat_id` - Target chat, numeric id or `@channel` name
    ///
    /// # Example
    ///
    /// ```ignore
    /// let bot = TelegramBot::new(client, "https://api.telegram.org", &token, "-100123");
    /// bot.send("Hello").await?;
    /// ```
    pub fn new(client: Client, api_base: &str, token: &str, chat_id: &str) -> Self {
        Self {
            client,
            api_url: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
        }
    }
}

impl ChatSender for TelegramBot {
    #[instrument(level = "debug", skip_all, fields(chat_id = %self.chat_id))]
    async fn send(&self, text: &str) -> Result<(), ChatError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "markdown",
        });
        let resp = self.client.post(&self.api_url).json(&body).send().await?;
        let status = resp.status();
        let raw = resp.text().await?;
        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                message: truncate_for_log(&raw, 300),
            });
        }
        let ack: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        debug!(response = %ack, "Chat acknowledged");
        Ok(())
    }
}

/// Escape the characters legacy Telegram Markdown treats as entity markers.
///
/// Scraped headlines and model explanations are free text; an unescaped
/// `_` or `*` makes the API reject the whole message.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn explanation_line(explanation: &str) -> Option<String> {
    let trimmed = trim_formatting(explanation);
    (!trimmed.is_empty()).then(|| escape_markdown(trimmed))
}

fn term_message(record: &AnalysisRecord, half: &TermClassification) -> String {
    let mut message = format!(
        "*{}* - {}\n\nResult: *{}*\nTerm: {}\n\n",
        escape_markdown(&record.ticker),
        escape_markdown(&record.headline),
        half.label,
        half.term
    );
    if let Some(explanation) = explanation_line(&half.explanation) {
        message.push_str(&format!("Explanation: {explanation}"));
    }
    message.trim_end().to_string()
}

fn combined_message(record: &AnalysisRecord) -> String {
    let mut message = format!(
        "*{}* - {}\n\nResult: *{}*\nTerm: {} and {}\n\n",
        escape_markdown(&record.ticker),
        escape_markdown(&record.headline),
        record.short.label,
        record.short.term,
        record.long.term
    );
    for half in [&record.short, &record.long] {
        if let Some(explanation) = explanation_line(&half.explanation) {
            message.push_str(&format!("Explanation ({}): {explanation}\n", half.term));
        }
    }
    message.trim_end().to_string()
}

/// The alert messages for one record, possibly none.
pub fn messages(record: &AnalysisRecord) -> Vec<String> {
    let (short, long) = (record.short.label, record.long.label);
    if short == Label::Neutral && long == Label::Neutral {
        return Vec::new();
    }
    if short == long {
        return vec![combined_message(record)];
    }
    vec![term_message(record, &record.short), term_message(record, &record.long)]
}

/// Sends the alerts for each record through one [`ChatSender`].
pub struct Notifier<C> {
    sender: C,
}

impl<C: ChatSender> Notifier<C> {
    /// Wrap the channel alerts go to.
    pub fn new(sender: C) -> Self {
        Self { sender }
    }

    /// Send every alert for `record`. Returns how many were delivered.
    #[instrument(level = "info", skip_all, fields(ticker = %record.ticker))]
    pub async fn notify(&self, record: &AnalysisRecord) -> usize {
        let messages = messages(record);
        if messages.is_empty() {
            debug!("Both terms neutral; no alert");
            return 0;
        }

        let mut delivered = 0;
        for message in &messages {
            match self.sender.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => error!(error = %e, "Failed to send alert"),
            }
        }
        info!(delivered, total = messages.len(), "Sent alerts");
        delivered
    }

    /// Free-form status message, e.g. before sleeping.
    pub async fn announce(&self, text: &str) {
        if let Err(e) = self.sender.send(text).await {
            error!(error = %e, "Failed to send status message");
        }
    }
}
