//! Telegram Bot API: outbound notifications and inbound commands

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{Result, TraderError};
use crate::common::traits::Notifier;
use crate::config::types::TelegramConfig;
use crate::reporting::{CommandHandler, NotificationEvent};

/// Back-off after a failed `getUpdates`
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Thin Bot API client bound to one chat
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    chat_id: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let poll_timeout_secs = config.poll_timeout_secs;
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()
            .map_err(|e| TraderError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token),
            chat_id: config.chat_id.clone(),
            poll_timeout_secs,
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Send a plain-text message to the configured chat
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("{}/sendMessage", self.base_url);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };
        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let body: ApiResponse<serde_json::Value> = response.json().await?;

        if status.is_success() && body.ok {
            debug!("Telegram message sent");
            Ok(())
        } else if status.as_u16() == 429 {
            Err(TraderError::RateLimit {
                message: body.description.unwrap_or_default(),
                retry_after_seconds: None,
            })
        } else {
            Err(TraderError::InvalidResponse(format!(
                "Telegram returned status {}: {}",
                status,
                body.description.unwrap_or_default()
            )))
        }
    }

    /// Long-poll for updates after `offset`
    #[instrument(skip(self))]
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!(
            "{}/getUpdates?offset={}&timeout={}&allowed_updates=%5B%22message%22%5D",
            self.base_url, offset, self.poll_timeout_secs
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body: ApiResponse<Vec<Update>> = response.json().await?;
        if !status.is_success() || !body.ok {
            return Err(TraderError::InvalidResponse(format!(
                "Telegram returned status {}: {}",
                status,
                body.description.unwrap_or_default()
            )));
        }
        Ok(body.result.unwrap_or_default())
    }
}

/// Pushes events to a Telegram chat
pub struct TelegramNotifier {
    client: TelegramClient,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.client.send_message(&event.to_string()).await
    }

    fn channel_name(&self) -> &'static str {
        "telegram"
    }
}

/// Answers chat commands until shutdown
pub struct CommandListener {
    client: TelegramClient,
    handler: CommandHandler,
    offset: i64,
}

impl CommandListener {
    pub fn new(client: TelegramClient, handler: CommandHandler) -> Self {
        Self {
            client,
            handler,
            offset: 0,
        }
    }

    /// Handle one batch of updates; returns how many replies were sent
    pub async fn poll_once(&mut self) -> Result<usize> {
        let updates = self.client.get_updates(self.offset).await?;
        let mut replies = 0;

        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != self.client.chat_id() {
                warn!(chat_id = message.chat.id, "Ignoring command from unknown chat");
                continue;
            }
            let Some(text) = message.text.filter(|t| t.starts_with('/')) else {
                continue;
            };

            info!(command = %text, "Command received");
            let reply = self.handler.handle(&text).await;
            if let Err(e) = self.client.send_message(&reply).await {
                warn!("Command reply failed: {}", e);
            } else {
                replies += 1;
            }
        }
        Ok(replies)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Telegram command listener started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!("Telegram polling failed: {}", e);
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(POLL_ERROR_DELAY) => {}
                        }
                    }
                }
            }
        }
        info!("Telegram command listener stopped");
    }
}
