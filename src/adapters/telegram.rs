//! Telegram Bot API delivery channel.
//!
//! Only the alert-delivery surface lives here; the conversational bot
//! that manages subscriptions is a separate consumer of the storage API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::{Result, SpikewatchError};

/// Telegram notification client
#[derive(Clone)]
pub struct TelegramNotifier {
    http: Client,
    api_url: String,
    bot_token: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(cfg: &TelegramConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("spikewatch/0.1")
            .build()
            .map_err(|e| {
                SpikewatchError::Internal(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            bot_token: cfg.bot_token.clone(),
        })
    }

    /// Send a Markdown-formatted message to a chat
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SpikewatchError::Delivery(e.to_string()))?;

        let status = resp.status();
        let body: SendMessageResponse = resp
            .json()
            .await
            .map_err(|e| SpikewatchError::Delivery(format!("HTTP {}: {}", status, e)))?;

        if !body.ok {
            return Err(SpikewatchError::Delivery(
                body.description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }

        debug!("Delivered alert to chat {}", chat_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl super::AlertMessenger for TelegramNotifier {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_request_shape() {
        let request = SendMessageRequest {
            chat_id: 12345,
            text: "hello",
            parse_mode: "Markdown",
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chat_id"], 12345);
        assert_eq!(json["text"], "hello");
        assert_eq!(json["parse_mode"], "Markdown");
    }

    #[test]
    fn test_error_response_parses() {
        let raw = r#"{"ok": false, "description": "Bad Request: chat not found"}"#;
        let resp: SendMessageResponse = serde_json::from_str(raw).unwrap();

        assert!(!resp.ok);
        assert_eq!(resp.description.as_deref(), Some("Bad Request: chat not found"));
    }
}
