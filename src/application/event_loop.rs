//! The Live Event Loop: two concurrent consumers (quote stream,
//! trade-update stream) cooperating through the Cycle Store, which is the
//! single serialization point for cycle mutations.

use crate::application::throttle::SymbolThrottle;
use crate::config::OperationalConfig;
use crate::domain::model::{CycleStatus, OrderSide, Quote, TradeEventKind, TradeUpdate};
use crate::domain::ports::{BrokerGateway, NotificationSink};
use crate::domain::repositories::{CycleStore, CycleUpdate, NewCycle};
use crate::domain::strategy::{self, Action, MarketTick};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct EventLoop {
    broker: Arc<dyn BrokerGateway>,
    store: Arc<dyn CycleStore>,
    notifier: Arc<dyn NotificationSink>,
    operational: OperationalConfig,
    throttle: SymbolThrottle,
}

impl EventLoop {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        store: Arc<dyn CycleStore>,
        notifier: Arc<dyn NotificationSink>,
        operational: OperationalConfig,
    ) -> Self {
        let throttle = SymbolThrottle::new(operational.order_cooldown_seconds);
        Self { broker, store, notifier, operational, throttle }
    }

    /// Runs both consumers until `shutdown` is signalled. Each consumer
    /// processes its own events sequentially; the two run concurrently with
    /// each other.
    pub async fn run(self: Arc<Self>, symbols: Vec<String>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut quotes = self.broker.stream_quotes(symbols).await?;
        let mut trades = self.broker.stream_trade_updates().await?;

        let quote_loop = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe_quote = quotes.recv() => {
                            match maybe_quote {
                                Some(quote) => this.handle_quote(quote).await,
                                None => break,
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                    }
                }
            })
        };

        let trade_loop = {
            let this = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe_update = trades.recv() => {
                            match maybe_update {
                                Some(update) => this.handle_trade_update(update).await,
                                None => break,
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                    }
                }
            })
        };

        let (quote_res, trade_res) = tokio::join!(quote_loop, trade_loop);
        quote_res?;
        trade_res?;
        Ok(())
    }

    async fn handle_quote(&self, quote: Quote) {
        if self.throttle.is_throttled(&quote.symbol) {
            return;
        }

        let asset = match self.store.get_asset(&quote.symbol).await {
            Ok(Some(asset)) if asset.enabled => asset,
            Ok(_) => return,
            Err(e) => {
                error!(symbol = %quote.symbol, "failed to load asset config: {e}");
                return;
            }
        };

        let cycle = match self.store.get_latest_cycle(asset.id).await {
            Ok(Some(cycle)) => cycle,
            Ok(None) => return,
            Err(e) => {
                error!(symbol = %quote.symbol, "failed to load latest cycle: {e}");
                return;
            }
        };

        let position = match self.broker.get_position(&quote.symbol).await {
            Ok(position) => position,
            Err(e) => {
                warn!(symbol = %quote.symbol, "failed to fetch live position, proceeding without it: {e}");
                None
            }
        };

        let tick = MarketTick { bid_price: quote.bid_price, ask_price: quote.ask_price };
        let testing_mode = self.operational.testing_mode;

        let actions = [
            strategy::decide_base_order(tick, &asset, &cycle, position.as_ref(), testing_mode),
            strategy::decide_safety_order(tick, &asset, &cycle, testing_mode),
            strategy::decide_take_profit(tick, &asset, &cycle, position.as_ref(), testing_mode),
        ];

        for action in actions.into_iter().flatten() {
            self.execute_action(&quote.symbol, cycle.id, action).await;
        }
    }

    async fn execute_action(&self, symbol: &str, cycle_id: i64, action: Action) {
        if let Some(warning) = &action.warning {
            warn!(symbol, cycle_id, "{warning}");
        }

        if let Some(order) = action.order {
            let submission = if self.operational.dry_run_mode {
                info!(symbol, side = ?order.side, qty = %order.qty, "dry run: would submit order");
                return;
            } else {
                match order.side {
                    OrderSide::Buy => {
                        self.broker
                            .submit_limit_buy(symbol, order.qty, order.limit_price.unwrap_or(Decimal::ZERO))
                            .await
                    }
                    OrderSide::Sell => self.broker.submit_market_sell(symbol, order.qty).await,
                }
            };

            match submission {
                Ok(broker_order) => {
                    self.throttle.mark(symbol);
                    if let Some(update) = action.cycle_update {
                        let mut cycle_update = CycleUpdate::new()
                            .latest_order_id(Some(broker_order.id.clone()))
                            .latest_order_created_at(Some(broker_order.created_at));
                        if let Some(status) = update.status {
                            cycle_update = cycle_update.status(status);
                        }
                        if let Err(e) = self.store.update_cycle(cycle_id, cycle_update).await {
                            error!(symbol, cycle_id, "failed to persist cycle update after order submission: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol, "order submission rejected: {e}");
                    self.throttle.mark(symbol);
                }
            }
        } else if let Some(ttp) = action.ttp_update {
            let mut cycle_update = CycleUpdate::new();
            if let Some(status) = ttp.status {
                cycle_update = cycle_update.status(status);
            }
            if let Some(peak) = ttp.highest_trailing_price {
                cycle_update = cycle_update.highest_trailing_price(Some(peak));
            }
            if let Err(e) = self.store.update_cycle(cycle_id, cycle_update).await {
                error!(symbol, cycle_id, "failed to persist TTP update: {e}");
            }
            self.throttle.mark(symbol);
        }
    }

    async fn handle_trade_update(&self, update: TradeUpdate) {
        let order_id = update.order.id.clone();
        let cycle = match self.store.find_cycle_by_order_id(&order_id).await {
            Ok(Some(cycle)) => cycle,
            Ok(None) => {
                info!(order_id, "orphan trade-update event: no cycle references this order");
                return;
            }
            Err(e) => {
                error!(order_id, "failed to look up cycle by order id: {e}");
                return;
            }
        };

        match update.event {
            TradeEventKind::PartialFill => {
                // Informational only; financials update on the terminal event.
            }
            TradeEventKind::Fill => self.handle_terminal_fill(&cycle, &update).await,
            TradeEventKind::Canceled | TradeEventKind::Rejected | TradeEventKind::Expired => {
                self.handle_terminal_non_fill(&cycle, &update).await
            }
            TradeEventKind::New => {}
        }
    }

    async fn handle_terminal_fill(&self, cycle: &crate::domain::model::Cycle, update: &TradeUpdate) {
        let symbol = &update.order.symbol;
        let fill_price = update.fill_price.or(update.order.filled_avg_price).unwrap_or(Decimal::ZERO);
        let fill_qty = update.fill_qty.unwrap_or(update.order.filled_qty);

        match update.order.side {
            OrderSide::Buy => {
                let was_base_order = cycle.quantity == Decimal::ZERO;
                let position = self.broker.get_position(symbol).await.ok().flatten();

                let (new_qty, new_avg) = match &position {
                    Some(p) => (p.qty, p.avg_entry_price),
                    None => {
                        let old_qty = cycle.quantity;
                        let old_avg = cycle.average_purchase_price;
                        let new_qty = old_qty + fill_qty;
                        let new_avg = if new_qty > Decimal::ZERO {
                            (old_qty * old_avg + fill_qty * fill_price) / new_qty
                        } else {
                            Decimal::ZERO
                        };
                        (new_qty, new_avg)
                    }
                };

                let mut cycle_update = CycleUpdate::new()
                    .status(CycleStatus::Watching)
                    .quantity(new_qty)
                    .average_purchase_price(new_avg)
                    .last_order_fill_price(Some(fill_price))
                    .latest_order_id(None)
                    .latest_order_created_at(None);
                if !was_base_order {
                    cycle_update = cycle_update.safety_orders(cycle.safety_orders + 1);
                }

                if let Err(e) = self.store.update_cycle(cycle.id, cycle_update).await {
                    error!(symbol, cycle_id = cycle.id, "failed to persist buy fill: {e}");
                }
            }
            OrderSide::Sell => self.complete_cycle_after_sell(cycle, symbol, fill_price).await,
        }
    }

    async fn complete_cycle_after_sell(&self, cycle: &crate::domain::model::Cycle, symbol: &str, sell_price: Decimal) {
        let now = Utc::now();
        let cycle_update = CycleUpdate::new()
            .status(CycleStatus::Complete)
            .quantity(Decimal::ZERO)
            .sell_price(Some(sell_price))
            .latest_order_id(None)
            .latest_order_created_at(None)
            .completed_at(Some(now));

        if let Err(e) = self.store.update_cycle(cycle.id, cycle_update).await {
            error!(symbol, cycle_id = cycle.id, "failed to complete cycle after sell: {e}");
            return;
        }

        if let Err(e) = self
            .store
            .update_asset(cycle.asset_id, crate::domain::repositories::AssetUpdate { last_sell_price: Some(sell_price) })
            .await
        {
            error!(symbol, "failed to record last_sell_price: {e}");
        }

        if let Err(e) = self.store.create_cycle(NewCycle::cooldown(cycle.asset_id)).await {
            error!(symbol, "failed to create successor cooldown cycle: {e}");
        }

        self.notifier.notify(&format!("{symbol}: cycle complete, sold at {sell_price}")).await;
    }

    async fn handle_terminal_non_fill(&self, cycle: &crate::domain::model::Cycle, update: &TradeUpdate) {
        let symbol = &update.order.symbol;
        let had_partial_fills = update.order.filled_qty > Decimal::ZERO;

        match update.order.side {
            OrderSide::Buy => {
                if had_partial_fills {
                    self.handle_terminal_fill(
                        cycle,
                        &TradeUpdate {
                            event: TradeEventKind::Fill,
                            fill_price: update.order.filled_avg_price,
                            fill_qty: Some(update.order.filled_qty),
                            ..update.clone()
                        },
                    )
                    .await;
                } else {
                    let cycle_update = CycleUpdate::new()
                        .status(CycleStatus::Watching)
                        .latest_order_id(None)
                        .latest_order_created_at(None);
                    if let Err(e) = self.store.update_cycle(cycle.id, cycle_update).await {
                        error!(symbol, cycle_id = cycle.id, "failed to revert cycle after canceled buy: {e}");
                    }
                }
            }
            OrderSide::Sell => {
                let position = self.broker.get_position(symbol).await.ok().flatten();
                let remaining = position.as_ref().map(|p| p.qty).unwrap_or(Decimal::ZERO);

                if had_partial_fills && remaining == Decimal::ZERO {
                    let fill_price = update.order.filled_avg_price.unwrap_or(Decimal::ZERO);
                    self.complete_cycle_after_sell(cycle, symbol, fill_price).await;
                } else {
                    let cycle_update = CycleUpdate::new()
                        .status(CycleStatus::Watching)
                        .latest_order_id(None)
                        .latest_order_created_at(None);
                    if let Err(e) = self.store.update_cycle(cycle.id, cycle_update).await {
                        error!(symbol, cycle_id = cycle.id, "failed to revert cycle after canceled sell: {e}");
                    }
                }
            }
        }
    }
}
