//! Webhook delivery
//!
//! One JSON POST per send, fire-and-forget: the response status and body are
//! not interpreted, so an opaque cross-origin style endpoint works. A
//! transport-level error is the only failure signal. Callers are responsible
//! for not issuing overlapping sends.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Fixed source identifier carried in every envelope
pub const SOURCE_IDENT: &str = "voice-to-text-app";

/// Per-request timeout for webhook POSTs
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("No webhook URL configured")]
    MissingUrl,
    #[error("No text to send")]
    EmptyText,
    #[error("Webhook delivery failed: {0}")]
    Transport(String),
}

/// JSON envelope POSTed to the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    pub timestamp: String,
    pub source: String,
}

impl OutboundMessage {
    /// Build an envelope for `text`, trimmed and stamped with the current time
    pub fn new(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            timestamp: jiff::Timestamp::now().to_string(),
            source: SOURCE_IDENT.to_string(),
        }
    }
}

/// HTTP client for webhook POSTs
pub struct WebhookSender {
    client: reqwest::Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Deliver `text` to `url`
    ///
    /// A blank URL or blank text is rejected before any network activity.
    /// Success means the request left without a transport error; the response
    /// is deliberately not inspected.
    pub async fn send(&self, url: &str, text: &str) -> Result<(), WebhookError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(WebhookError::MissingUrl);
        }
        if text.trim().is_empty() {
            return Err(WebhookError::EmptyText);
        }

        let message = OutboundMessage::new(text);
        tracing::debug!(url, chars = message.text.len(), "Posting to webhook");

        self.client
            .post(url)
            .json(&message)
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        Ok(())
    }
}
