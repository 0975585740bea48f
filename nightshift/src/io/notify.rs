//! Best-effort notification sink.
//!
//! Delivery is advisory: callers log failures and move on. The pipeline never
//! aborts because a message could not be sent.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

/// Abstraction over the notification sink.
pub trait Notifier {
    fn notify(&self, message: &str) -> Result<()>;
}

/// POSTs `{"text": ...}` to a webhook endpoint, capping the message length.
pub struct WebhookNotifier {
    http: reqwest::blocking::Client,
    url: String,
    max_message_chars: usize,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        max_message_chars: usize,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            url: url.into(),
            max_message_chars,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        let capped = truncate_chars(message, self.max_message_chars);
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "text": capped }))
            .send()
            .context("send notification")?;
        response
            .error_for_status()
            .context("notification rejected")?;
        debug!(chars = capped.len(), "notification delivered");
        Ok(())
    }
}

/// Used when no endpoint is configured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Truncate to `max_chars` characters on a UTF-8 boundary.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
