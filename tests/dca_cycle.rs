//! End-to-end coverage of the per-asset cycle state machine, driven through
//! the Live Event Loop's public `run` entrypoint against the in-memory
//! broker and cycle store test doubles.

use dca_engine::application::EventLoop;
use dca_engine::config::OperationalConfig;
use dca_engine::domain::model::{
    AssetConfig, BrokerOrder, BrokerPosition, CycleStatus, OrderSide, OrderStatus, OrderType,
    Quote, TradeEventKind, TradeUpdate,
};
use dca_engine::domain::ports::NullNotificationSink;
use dca_engine::domain::repositories::NewCycle;
use dca_engine::infrastructure::mock::{InMemoryCycleStore, MockBrokerGateway};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn asset(ttp_enabled: bool) -> AssetConfig {
    AssetConfig {
        id: 1,
        symbol: "BTC/USD".into(),
        enabled: true,
        base_order_amount: dec!(100),
        safety_order_amount: dec!(50),
        max_safety_orders: 2,
        safety_order_deviation_pct: dec!(2),
        take_profit_pct: dec!(1),
        ttp_enabled,
        ttp_deviation_pct: dec!(1),
        cooldown_seconds: 60,
        last_sell_price: None,
    }
}

fn operational() -> OperationalConfig {
    OperationalConfig {
        dry_run_mode: false,
        testing_mode: false,
        integration_test_mode: true,
        order_cooldown_seconds: 0,
        stale_order_threshold_minutes: 5,
        stuck_market_sell_timeout_seconds: 75,
    }
}

struct Harness {
    broker: Arc<MockBrokerGateway>,
    store: Arc<InMemoryCycleStore>,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn spawn() -> Self {
        let broker = Arc::new(MockBrokerGateway::new());
        let store = Arc::new(InMemoryCycleStore::new());
        let event_loop = Arc::new(EventLoop::new(
            broker.clone(),
            store.clone(),
            Arc::new(NullNotificationSink),
            operational(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(event_loop.run(vec!["BTC/USD".to_string()], shutdown_rx));
        // let both consumer loops subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Harness { broker, store, shutdown_tx, handle }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), self.handle).await;
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn filled_order(id: &str, symbol: &str, side: OrderSide, qty: rust_decimal::Decimal, price: rust_decimal::Decimal) -> BrokerOrder {
    BrokerOrder {
        id: id.to_string(),
        symbol: symbol.to_string(),
        side,
        order_type: match side {
            OrderSide::Buy => OrderType::Limit,
            OrderSide::Sell => OrderType::Market,
        },
        status: OrderStatus::Filled,
        qty,
        filled_qty: qty,
        filled_avg_price: Some(price),
        limit_price: if side == OrderSide::Buy { Some(price) } else { None },
        created_at: chrono::Utc::now(),
        filled_at: Some(chrono::Utc::now()),
        canceled_at: None,
    }
}

#[tokio::test]
async fn base_order_fills_then_take_profit_completes_the_cycle_without_ttp() {
    let harness = Harness::spawn().await;
    harness.store.seed_asset(asset(false)).await;
    harness.store.create_cycle(NewCycle::watching(1)).await.unwrap();

    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(100), ask_price: dec!(101), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;

    let buying = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(buying.status, CycleStatus::Buying);
    let order_id = buying.latest_order_id.clone().unwrap();

    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(1), avg_entry_price: dec!(100) });
    harness
        .broker
        .push_trade_update(TradeUpdate {
            event: TradeEventKind::Fill,
            order: filled_order(&order_id, "BTC/USD", OrderSide::Buy, dec!(1), dec!(100)),
            fill_price: Some(dec!(100)),
            fill_qty: Some(dec!(1)),
            execution_id: Some("exec-1".into()),
        })
        .await;
    harness.settle().await;

    let watching = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(watching.status, CycleStatus::Watching);
    assert_eq!(watching.quantity, dec!(1));

    // bid 101 clears the 1% take-profit trigger on an average price of 100.
    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(101), ask_price: dec!(101), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;

    let selling = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(selling.status, CycleStatus::Selling);
    let sell_order_id = selling.latest_order_id.clone().unwrap();

    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(0), avg_entry_price: dec!(0) });
    harness
        .broker
        .push_trade_update(TradeUpdate {
            event: TradeEventKind::Fill,
            order: filled_order(&sell_order_id, "BTC/USD", OrderSide::Sell, dec!(1), dec!(101)),
            fill_price: Some(dec!(101)),
            fill_qty: Some(dec!(1)),
            execution_id: Some("exec-2".into()),
        })
        .await;
    harness.settle().await;

    let completed_cycles = harness.store.list_cycles_by_status(CycleStatus::Complete).await.unwrap();
    assert_eq!(completed_cycles.len(), 1);
    assert_eq!(completed_cycles[0].sell_price, Some(dec!(101)));

    let cooldowns = harness.store.list_cycles_by_status(CycleStatus::Cooldown).await.unwrap();
    assert_eq!(cooldowns.len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn safety_order_fires_after_base_order_on_deviation_and_reprices_the_average() {
    let harness = Harness::spawn().await;
    harness.store.seed_asset(asset(false)).await;
    harness.store.create_cycle(NewCycle::watching(1)).await.unwrap();

    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(100), ask_price: dec!(100), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;
    let buying = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    let base_order_id = buying.latest_order_id.clone().unwrap();

    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(1), avg_entry_price: dec!(100) });
    harness
        .broker
        .push_trade_update(TradeUpdate {
            event: TradeEventKind::Fill,
            order: filled_order(&base_order_id, "BTC/USD", OrderSide::Buy, dec!(1), dec!(100)),
            fill_price: Some(dec!(100)),
            fill_qty: Some(dec!(1)),
            execution_id: Some("exec-1".into()),
        })
        .await;
    harness.settle().await;

    // 2% below the last fill (100) is 98; ask 97 breaches the trigger.
    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(97), ask_price: dec!(97), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;

    let safety_buying = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(safety_buying.status, CycleStatus::Buying);
    let safety_order_id = safety_buying.latest_order_id.clone().unwrap();
    assert_ne!(safety_order_id, base_order_id);

    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(1.515), avg_entry_price: dec!(98.35) });
    harness
        .broker
        .push_trade_update(TradeUpdate {
            event: TradeEventKind::Fill,
            order: filled_order(&safety_order_id, "BTC/USD", OrderSide::Buy, dec!(0.515), dec!(97)),
            fill_price: Some(dec!(97)),
            fill_qty: Some(dec!(0.515)),
            execution_id: Some("exec-2".into()),
        })
        .await;
    harness.settle().await;

    let repriced = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(repriced.status, CycleStatus::Watching);
    assert_eq!(repriced.safety_orders, 1);
    assert_eq!(repriced.quantity, dec!(1.515));
    assert_eq!(repriced.average_purchase_price, dec!(98.35));

    harness.stop().await;
}

#[tokio::test]
async fn trailing_take_profit_arms_raises_peak_and_sells_on_reversal() {
    let harness = Harness::spawn().await;
    harness.store.seed_asset(asset(true)).await;
    let cycle = harness.store.create_cycle(NewCycle::watching(1)).await.unwrap();
    harness
        .store
        .update_cycle(
            cycle.id,
            dca_engine::domain::repositories::CycleUpdate::new()
                .status(CycleStatus::Watching)
                .quantity(dec!(1))
                .average_purchase_price(dec!(100))
                .last_order_fill_price(Some(dec!(100))),
        )
        .await
        .unwrap();
    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(1), avg_entry_price: dec!(100) });

    // take-profit trigger (101) breached: arms trailing, no order placed.
    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(101), ask_price: dec!(101), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;
    let trailing = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(trailing.status, CycleStatus::Trailing);
    assert_eq!(trailing.highest_trailing_price, Some(dec!(101)));
    assert!(trailing.latest_order_id.is_none());

    // price rises further: peak follows.
    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(110), ask_price: dec!(110), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;
    let raised = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(raised.highest_trailing_price, Some(dec!(110)));

    // price falls 1% below the 110 peak (108.9): sells.
    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(108), ask_price: dec!(108), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;
    let selling = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(selling.status, CycleStatus::Selling);

    harness.stop().await;
}

#[tokio::test]
async fn canceled_buy_with_partial_fill_is_treated_as_a_fill_not_a_revert() {
    let harness = Harness::spawn().await;
    harness.store.seed_asset(asset(false)).await;
    harness.store.create_cycle(NewCycle::watching(1)).await.unwrap();

    harness
        .broker
        .push_quote(Quote { symbol: "BTC/USD".into(), bid_price: dec!(100), ask_price: dec!(101), timestamp: chrono::Utc::now() })
        .await;
    harness.settle().await;
    let buying = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    let order_id = buying.latest_order_id.clone().unwrap();

    let mut partially_filled = filled_order(&order_id, "BTC/USD", OrderSide::Buy, dec!(1), dec!(101));
    partially_filled.status = OrderStatus::Canceled;
    partially_filled.filled_qty = dec!(0.4);
    partially_filled.canceled_at = Some(chrono::Utc::now());

    harness.broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(0.4), avg_entry_price: dec!(101) });
    harness
        .broker
        .push_trade_update(TradeUpdate {
            event: TradeEventKind::Canceled,
            order: partially_filled,
            fill_price: None,
            fill_qty: None,
            execution_id: Some("exec-partial".into()),
        })
        .await;
    harness.settle().await;

    let reconciled = harness.store.get_latest_cycle(1).await.unwrap().unwrap();
    assert_eq!(reconciled.status, CycleStatus::Watching);
    assert_eq!(reconciled.quantity, dec!(0.4));
    assert_eq!(reconciled.average_purchase_price, dec!(101));

    harness.stop().await;
}
