//! In-memory test doubles for the Broker Gateway and Cycle Store, used by
//! integration tests that exercise the Live Event Loop and Reconciliation
//! Workers without a real exchange or database.

use crate::domain::model::{
    AssetConfig, BrokerOrder, BrokerPosition, Cycle, CycleStatus, OrderStatus, Quote, TradeUpdate,
};
use crate::domain::ports::BrokerGateway;
use crate::domain::repositories::{AssetUpdate, CycleStore, CycleUpdate, NewCycle};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MockBrokerGateway {
    orders: Mutex<HashMap<String, BrokerOrder>>,
    positions: Mutex<HashMap<String, BrokerPosition>>,
    next_order_id: Mutex<u64>,
    quote_tx: Mutex<Option<Sender<Quote>>>,
    trade_tx: Mutex<Option<Sender<TradeUpdate>>>,
}

impl MockBrokerGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let mut n = self.next_order_id.lock().unwrap();
        *n += 1;
        format!("mock-order-{n}")
    }

    /// Test hook: publish a quote to whichever consumer subscribed via
    /// `stream_quotes`.
    pub async fn push_quote(&self, quote: Quote) {
        if let Some(tx) = self.quote_tx.lock().unwrap().clone() {
            let _ = tx.send(quote).await;
        }
    }

    /// Test hook: publish a trade-update event.
    pub async fn push_trade_update(&self, update: TradeUpdate) {
        if let Some(tx) = self.trade_tx.lock().unwrap().clone() {
            let _ = tx.send(update).await;
        }
    }

    pub fn set_position(&self, position: BrokerPosition) {
        self.positions.lock().unwrap().insert(position.symbol.clone(), position);
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn submit_limit_buy(&self, symbol: &str, qty: Decimal, limit_price: Decimal) -> Result<BrokerOrder> {
        let order = BrokerOrder {
            id: self.next_id(),
            symbol: symbol.to_string(),
            side: crate::domain::model::OrderSide::Buy,
            order_type: crate::domain::model::OrderType::Limit,
            status: OrderStatus::New,
            qty,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            limit_price: Some(limit_price),
            created_at: Utc::now(),
            filled_at: None,
            canceled_at: None,
        };
        self.orders.lock().unwrap().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn submit_market_sell(&self, symbol: &str, qty: Decimal) -> Result<BrokerOrder> {
        let order = BrokerOrder {
            id: self.next_id(),
            symbol: symbol.to_string(),
            side: crate::domain::model::OrderSide::Sell,
            order_type: crate::domain::model::OrderType::Market,
            status: OrderStatus::New,
            qty,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            limit_price: None,
            created_at: Utc::now(),
            filled_at: None,
            canceled_at: None,
        };
        self.orders.lock().unwrap().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(order_id) {
            order.status = OrderStatus::Canceled;
            order.canceled_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        Ok(self.orders.lock().unwrap().get(order_id).cloned())
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        Ok(self.positions.lock().unwrap().get(symbol).cloned())
    }

    async fn stream_quotes(&self, _symbols: Vec<String>) -> Result<Receiver<Quote>> {
        let (tx, rx) = mpsc::channel(256);
        *self.quote_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stream_trade_updates(&self) -> Result<Receiver<TradeUpdate>> {
        let (tx, rx) = mpsc::channel(256);
        *self.trade_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

/// Plain `Vec`-backed Cycle Store; serializes updates through a single
/// `RwLock` rather than SQLite's own write lock.
#[derive(Default)]
pub struct InMemoryCycleStore {
    assets: RwLock<Vec<AssetConfig>>,
    cycles: RwLock<Vec<Cycle>>,
    next_cycle_id: Mutex<i64>,
}

impl InMemoryCycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_asset(&self, asset: AssetConfig) {
        self.assets.write().await.push(asset);
    }
}

#[async_trait]
impl CycleStore for InMemoryCycleStore {
    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetConfig>> {
        Ok(self.assets.read().await.iter().find(|a| a.symbol == symbol).cloned())
    }

    async fn get_asset_by_id(&self, id: i64) -> Result<Option<AssetConfig>> {
        Ok(self.assets.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn list_enabled_assets(&self) -> Result<Vec<AssetConfig>> {
        Ok(self.assets.read().await.iter().filter(|a| a.enabled).cloned().collect())
    }

    async fn update_asset(&self, id: i64, fields: AssetUpdate) -> Result<()> {
        let mut assets = self.assets.write().await;
        if let Some(asset) = assets.iter_mut().find(|a| a.id == id) {
            if let Some(price) = fields.last_sell_price {
                asset.last_sell_price = Some(price);
            }
        }
        Ok(())
    }

    async fn get_latest_cycle(&self, asset_id: i64) -> Result<Option<Cycle>> {
        Ok(self
            .cycles
            .read()
            .await
            .iter()
            .filter(|c| c.asset_id == asset_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn find_cycle_by_order_id(&self, order_id: &str) -> Result<Option<Cycle>> {
        Ok(self
            .cycles
            .read()
            .await
            .iter()
            .find(|c| c.latest_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn create_cycle(&self, fields: NewCycle) -> Result<Cycle> {
        let mut id_guard = self.next_cycle_id.lock().unwrap();
        *id_guard += 1;
        let now = Utc::now();
        let cycle = Cycle {
            id: *id_guard,
            asset_id: fields.asset_id,
            status: fields.status,
            quantity: fields.quantity,
            average_purchase_price: fields.average_purchase_price,
            safety_orders: fields.safety_orders,
            latest_order_id: None,
            latest_order_created_at: None,
            last_order_fill_price: fields.last_order_fill_price,
            highest_trailing_price: None,
            sell_price: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.cycles.write().await.push(cycle.clone());
        Ok(cycle)
    }

    async fn update_cycle(&self, id: i64, fields: CycleUpdate) -> Result<()> {
        let mut cycles = self.cycles.write().await;
        let cycle = cycles
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow::anyhow!("cycle {id} not found"))?;

        if let Some(status) = fields.status {
            cycle.status = status;
        }
        if let Some(qty) = fields.quantity {
            cycle.quantity = qty;
        }
        if let Some(avg) = fields.average_purchase_price {
            cycle.average_purchase_price = avg;
        }
        if let Some(so) = fields.safety_orders {
            cycle.safety_orders = so;
        }
        if let Some(oid) = fields.latest_order_id {
            cycle.latest_order_id = oid;
        }
        if let Some(at) = fields.latest_order_created_at {
            cycle.latest_order_created_at = at;
        }
        if let Some(p) = fields.last_order_fill_price {
            cycle.last_order_fill_price = p;
        }
        if let Some(p) = fields.highest_trailing_price {
            cycle.highest_trailing_price = p;
        }
        if let Some(p) = fields.sell_price {
            cycle.sell_price = p;
        }
        if let Some(at) = fields.completed_at {
            cycle.completed_at = at;
        }
        cycle.updated_at = Utc::now();
        Ok(())
    }

    async fn list_cycles_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>> {
        Ok(self.cycles.read().await.iter().filter(|c| c.status == status).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::OrderSide;
    use rust_decimal_macros::dec;

    fn asset(symbol: &str) -> AssetConfig {
        AssetConfig {
            id: 1,
            symbol: symbol.to_string(),
            enabled: true,
            base_order_amount: dec!(100),
            safety_order_amount: dec!(50),
            max_safety_orders: 2,
            safety_order_deviation_pct: dec!(2),
            take_profit_pct: dec!(1),
            ttp_enabled: false,
            ttp_deviation_pct: dec!(0),
            cooldown_seconds: 60,
            last_sell_price: None,
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_cycle() {
        let store = InMemoryCycleStore::new();
        store.seed_asset(asset("BTC/USD")).await;

        let cycle = store.create_cycle(NewCycle::watching(1)).await.unwrap();
        assert_eq!(cycle.status, CycleStatus::Watching);

        store
            .update_cycle(cycle.id, CycleUpdate::new().status(CycleStatus::Buying).latest_order_id(Some("o1".into())))
            .await
            .unwrap();

        let found = store.find_cycle_by_order_id("o1").await.unwrap().unwrap();
        assert_eq!(found.status, CycleStatus::Buying);
    }

    #[tokio::test]
    async fn mock_broker_round_trips_an_order() {
        let broker = MockBrokerGateway::new();
        let order = broker.submit_limit_buy("BTC/USD", dec!(1), dec!(100)).await.unwrap();
        assert_eq!(order.side, OrderSide::Buy);

        let fetched = broker.get_order(&order.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, order.id);

        broker.cancel_order(&order.id).await.unwrap();
        let cancelled = broker.get_order(&order.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OrderStatus::Canceled);
    }
}
