//! Configuration module.
//!
//! Structured configuration loading from environment variables, organized
//! by concern: broker credentials, the Cycle Store connection, operational
//! toggles, and the optional notification sink.

mod broker_config;
mod notification_config;
mod operational_config;
mod store_config;

pub use broker_config::AlpacaConfig;
pub use notification_config::NotificationConfig;
pub use operational_config::OperationalConfig;
pub use store_config::StoreConfig;

use anyhow::Result;

/// Aggregated application configuration, assembled once at startup and
/// shared (read-only) across the Live Event Loop and Reconciliation
/// Workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub alpaca: AlpacaConfig,
    pub store: StoreConfig,
    pub operational: OperationalConfig,
    pub notification: NotificationConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            alpaca: AlpacaConfig::from_env(),
            store: StoreConfig::from_env(),
            operational: OperationalConfig::from_env(),
            notification: NotificationConfig::from_env(),
        })
    }
}
