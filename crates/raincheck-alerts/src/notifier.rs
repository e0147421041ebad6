//! Rain notification delivery.

use async_trait::async_trait;
use raincheck_weather::format::{rain_alert_text, Language};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Permission was withdrawn between the gate check and delivery.
    #[error("Notification permission revoked")]
    PermissionRevoked,

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether notifications may be posted at all. Checked by the caller before `send`.
    fn permission_granted(&self) -> bool;

    /// Post a rain notification. `Ok(false)` means it could not be delivered.
    async fn send(&self, location_name: &str, probability_pct: u8) -> Result<bool, NotifyError>;
}

/// Prints notifications to stdout.
pub struct ConsoleNotifier {
    language: Language,
}

impl ConsoleNotifier {
    pub fn new(language: Language) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn permission_granted(&self) -> bool {
        true
    }

    async fn send(&self, location_name: &str, probability_pct: u8) -> Result<bool, NotifyError> {
        let text = rain_alert_text(location_name, probability_pct, self.language);
        println!("🌧️  {}", text);
        tracing::info!("Rain notification: {}", text);
        Ok(true)
    }
}

/// Posts notifications to a chat webhook as `{"text": ...}`.
///
/// A 401, 403 or 410 answer revokes the permission for the rest of the process.
pub struct WebhookNotifier {
    url: String,
    client: Client,
    language: Language,
    revoked: AtomicBool,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, client: Client, language: Language) -> Self {
        Self {
            url: url.into(),
            client,
            language,
            revoked: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn permission_granted(&self) -> bool {
        !self.revoked.load(Ordering::SeqCst)
    }

    async fn send(&self, location_name: &str, probability_pct: u8) -> Result<bool, NotifyError> {
        let text = rain_alert_text(location_name, probability_pct, self.language);
        let body = serde_json::json!({ "text": text });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::GONE => {
                self.revoked.store(true, Ordering::SeqCst);
                Err(NotifyError::PermissionRevoked)
            }
            status => Err(NotifyError::Delivery(format!("webhook answered {}", status))),
        }
    }
}
