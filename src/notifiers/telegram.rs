use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{NotificationResult, Notifier};
use crate::config::TelegramConfig;
use crate::utils::error::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Bot API envelope: `{"ok": bool, "result": ..., "description": ...}`.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<serde_json::Value>,
    description: Option<String>,
}

/// Sends alerts through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call(&self, method: &str, body: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let request = match body {
            Some(body) => self.client.post(self.method_url(method)).json(&body),
            None => self.client.get(self.method_url(method)),
        };
        // The token is part of the URL, so transport errors are reported without it.
        let response = request
            .send()
            .await
            .map_err(|e| AppError::NotificationFailure(format!("{} request failed: {}", method, e.without_url())))?;

        let status = response.status();
        let envelope: ApiResponse = response.json().await.map_err(|e| {
            AppError::NotificationFailure(format!("{} returned HTTP {} with an unreadable body: {}", method, status, e.without_url()))
        })?;

        if !status.is_success() || !envelope.ok {
            return Err(AppError::NotificationFailure(format!(
                "{} rejected (HTTP {}): {}",
                method,
                status.as_u16(),
                envelope.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        Ok(envelope.result.unwrap_or(serde_json::Value::Null))
    }

    /// Checks the token with `getMe`.
    pub async fn test_connection(&self) -> Result<bool> {
        let me = self.call("getMe", None).await?;
        tracing::debug!(bot = ?me.get("username"), "telegram bot reachable");
        Ok(me.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<NotificationResult> {
        let result = self
            .call("sendMessage", Some(json!({ "chat_id": recipient, "text": text })))
            .await?;

        let message_id = result.get("message_id").map(|id| id.to_string());
        tracing::info!(chat_id = recipient, message_id = ?message_id, "telegram alert sent");

        Ok(NotificationResult {
            success: true,
            message_id,
            error: None,
        })
    }
}
