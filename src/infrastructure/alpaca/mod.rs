pub mod common;
pub mod execution;
pub mod market_data;
pub mod trading_stream;

use crate::domain::model::{BrokerOrder, BrokerPosition, Quote, TradeUpdate};
use crate::domain::ports::BrokerGateway;
use anyhow::Result;
use async_trait::async_trait;
use execution::AlpacaExecution;
use market_data::AlpacaQuoteStream;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;
use trading_stream::AlpacaTradeStream;

/// Thin composition of the three Alpaca API surfaces (REST orders, the
/// crypto quote WebSocket, and the trade-update WebSocket) behind the
/// single `BrokerGateway` port.
pub struct AlpacaBrokerGateway {
    execution: AlpacaExecution,
    quote_stream: AlpacaQuoteStream,
    trade_stream: AlpacaTradeStream,
}

impl AlpacaBrokerGateway {
    pub fn new(api_key: String, api_secret: String, base_url: String, data_ws_url: String) -> Self {
        Self {
            execution: AlpacaExecution::new(api_key.clone(), api_secret.clone(), base_url.clone()),
            quote_stream: AlpacaQuoteStream::new(api_key.clone(), api_secret.clone(), data_ws_url),
            trade_stream: AlpacaTradeStream::new(api_key, api_secret, base_url),
        }
    }
}

#[async_trait]
impl BrokerGateway for AlpacaBrokerGateway {
    async fn submit_limit_buy(&self, symbol: &str, qty: Decimal, limit_price: Decimal) -> Result<BrokerOrder> {
        self.execution.submit_limit_buy(symbol, qty, limit_price).await
    }

    async fn submit_market_sell(&self, symbol: &str, qty: Decimal) -> Result<BrokerOrder> {
        self.execution.submit_market_sell(symbol, qty).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.execution.cancel_order(order_id).await
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        self.execution.get_order(order_id).await
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>> {
        self.execution.list_open_orders().await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        self.execution.get_position(symbol).await
    }

    async fn stream_quotes(&self, symbols: Vec<String>) -> Result<Receiver<Quote>> {
        Ok(self.quote_stream.stream(symbols))
    }

    async fn stream_trade_updates(&self) -> Result<Receiver<TradeUpdate>> {
        Ok(self.trade_stream.stream())
    }
}
