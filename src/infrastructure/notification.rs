//! Webhook-backed `NotificationSink`: a thin, fire-and-forget POST of the
//! message text. Delivery failures are logged and otherwise swallowed —
//! the core never blocks on or retries a notification.

use crate::domain::ports::NotificationSink;
use crate::infrastructure::core::HttpClientFactory;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::warn;

pub struct WebhookNotificationSink {
    client: ClientWithMiddleware,
    webhook_url: String,
}

impl WebhookNotificationSink {
    pub fn new(webhook_url: String) -> Self {
        Self { client: HttpClientFactory::create_client(), webhook_url }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, message: &str) {
        let body = serde_json::json!({ "text": message });
        if let Err(e) = self.client.post(&self.webhook_url).json(&body).send().await {
            warn!("failed to deliver notification: {e}");
        }
    }
}
