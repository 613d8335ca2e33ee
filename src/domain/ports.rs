//! Port interfaces to collaborators external to the core: the broker and
//! the (opaque) notification sink.

use crate::domain::model::{BrokerOrder, BrokerPosition, Quote, TradeUpdate};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;

/// Thin typed wrapper over the exchange REST/WebSocket API. Every numeric
/// field crossing this boundary is a `Decimal`; symbol normalization
/// (`BTC/USD` vs `BTCUSD`) is the Gateway's own responsibility.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn submit_limit_buy(
        &self,
        symbol: &str,
        qty: Decimal,
        limit_price: Decimal,
    ) -> Result<BrokerOrder>;

    async fn submit_market_sell(&self, symbol: &str, qty: Decimal) -> Result<BrokerOrder>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>>;

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>>;

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;

    /// Long-lived, auto-reconnecting quote stream. Callers observe
    /// at-least-once delivery.
    async fn stream_quotes(&self, symbols: Vec<String>) -> Result<Receiver<Quote>>;

    /// Long-lived, auto-reconnecting trade-update stream. Callers must
    /// tolerate duplicate events and deduplicate by `execution_id` where
    /// provided.
    async fn stream_trade_updates(&self) -> Result<Receiver<TradeUpdate>>;
}

/// A pure side-channel for operator notifications (Discord/email/webhook).
/// The core never blocks on delivery and treats failures as fire-and-forget;
/// a no-op implementation is the default wiring.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str);
}

pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn notify(&self, _message: &str) {}
}
