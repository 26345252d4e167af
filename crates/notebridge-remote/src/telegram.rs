//! Telegram Bot API notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use notebridge_core::{defaults, ChatNotifier, Error, Result};

/// Timeout for Bot API requests (seconds).
pub const TELEGRAM_TIMEOUT_SECS: u64 = 10;

/// Configuration for the Telegram notifier.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: defaults::TELEGRAM_API_URL.to_string(),
            timeout: Duration::from_secs(TELEGRAM_TIMEOUT_SECS),
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TELEGRAM_TOKEN` | required |
    /// | `TELEGRAM_API_URL` | `https://api.telegram.org` |
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_TOKEN")
            .map_err(|_| Error::Config("TELEGRAM_TOKEN is not set".into()))?;
        let mut config = Self::new(token);
        if let Ok(url) = std::env::var("TELEGRAM_API_URL") {
            config.api_url = url;
        }
        Ok(config)
    }

    /// Point the notifier at a different Bot API server.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Chat notifier backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!(
            "{}/bot{}",
            config.api_url.trim_end_matches('/'),
            config.token
        );
        Ok(Self { client, endpoint })
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let parsed: ApiResponse = response.json().await.map_err(|e| {
            Error::Chat(format!(
                "{} returned {} with unreadable body: {}",
                method,
                status,
                e.without_url()
            ))
        })?;

        if parsed.ok {
            return Ok(());
        }
        let description = parsed.description.unwrap_or_else(|| status.to_string());
        // Editing a message to the text it already has is a no-op, not a failure.
        if description.contains("message is not modified") {
            debug!(method, "Message already up to date");
            return Ok(());
        }
        Err(Error::Chat(format!("{}: {}", method, description)))
    }
}

#[async_trait]
impl ChatNotifier for TelegramNotifier {
    #[instrument(skip(self, text), fields(subsystem = "chat", op = "send_text"))]
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call("sendMessage", &SendMessage { chat_id, text }).await
    }

    #[instrument(skip(self, text), fields(subsystem = "chat", op = "edit_message_text"))]
    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        self.call(
            "editMessageText",
            &EditMessageText {
                chat_id,
                message_id,
                text,
            },
        )
        .await
    }
}
