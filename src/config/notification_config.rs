//! Optional notification sink configuration — opaque to the core; absent
//! values simply mean notifications are dropped by `NullNotificationSink`.

use std::env;

#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

impl NotificationConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
        }
    }
}
