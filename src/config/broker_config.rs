//! Broker configuration parsing from environment variables.

use std::env;

/// Alpaca API credentials and endpoints. The presence of `paper` in
/// `base_url` selects paper-trading mode.
#[derive(Debug, Clone, Default)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub data_url: String,
    pub ws_url: String,
}

impl AlpacaConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("API_KEY").unwrap_or_default(),
            secret_key: env::var("API_SECRET").unwrap_or_default(),
            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),
            data_url: env::var("ALPACA_DATA_URL")
                .unwrap_or_else(|_| "https://data.alpaca.markets".to_string()),
            ws_url: env::var("ALPACA_WS_URL")
                .unwrap_or_else(|_| "wss://stream.data.alpaca.markets/v1beta3/crypto/us".to_string()),
        }
    }

    pub fn is_paper_trading(&self) -> bool {
        self.base_url.contains("paper")
    }
}
