use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CalendarDate;
use crate::utils::error::Result;

pub mod telegram;

pub use telegram::TelegramNotifier;

/// Greeting sent by `--test-notify`.
pub const TEST_MESSAGE: &str = "Hello from your visa-alert bot!";

/// An earlier appointment than anything seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub earliest: CalendarDate,
}

impl NotificationEvent {
    pub fn new(earliest: CalendarDate) -> Self {
        Self { earliest }
    }

    /// One-line alert text.
    pub fn message(&self) -> String {
        format!("🗓️ New earliest visa appointment: {}", self.earliest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// Transport that delivers a one-line alert to a recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<NotificationResult>;
}
