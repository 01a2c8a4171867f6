use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::config::TelegramConfig;

/// One outage report, rendered both email-shaped (subject/body) and
/// chat-shaped (single message). Both carry the same information.
#[derive(Debug, Clone)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub message: String,
}

/// Delivery channel for outage reports. Failures are logged by the caller
/// and never interrupt monitoring.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Sends the chat-shaped message through the Telegram Bot API.
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    /// Returns `None` when neither the config nor the environment provides
    /// a token and chat id.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok())?;
        let chat_id = config
            .chat_id
            .clone()
            .or_else(|| std::env::var("TELEGRAM_CHAT_ID").ok())?;
        Some(Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": alert.message,
        });
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Telegram request failed")?;
        if !response.status().is_success() {
            bail!("Telegram API returned {}", response.status());
        }
        Ok(())
    }
}

/// Posts the subject/body pair to a JSON webhook (Discord-compatible embed).
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "username": "SIP Monitor",
            "embeds": [{
                "title": alert.subject,
                "description": alert.body,
                "color": 0xE74C3C,
                "timestamp": Utc::now().to_rfc3339(),
            }]
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("webhook request failed")?;
        if !response.status().is_success() {
            bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}
