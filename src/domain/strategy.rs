//! Pure decision functions for the per-asset cycle state machine: given a
//! market tick, the asset's configuration, its current cycle, and an
//! optional live broker position, decide what (if anything) to do next.
//!
//! These functions perform no I/O and read no environment state — the
//! testing-mode limit-price inflation is passed in explicitly by the caller
//! (`application::event_loop`), which is the only layer allowed to consult
//! the environment.

use crate::domain::model::{AssetConfig, BrokerPosition, Cycle, CycleStatus, MIN_ORDER_QTY, OrderSide, OrderType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A live market tick: best bid/ask for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct MarketTick {
    pub bid_price: Decimal,
    pub ask_price: Decimal,
}

/// Order placement requested by a Strategy Core function.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Partial cycle field mutation, applied by the Live Event Loop only after
/// the paired `OrderIntent` (if any) is submitted successfully.
#[derive(Debug, Clone, Default)]
pub struct CycleUpdateIntent {
    pub status: Option<CycleStatus>,
}

/// Partial TTP-specific field mutation — separated from `CycleUpdateIntent`
/// because it can fire without any order being placed.
#[derive(Debug, Clone, Default)]
pub struct TTPUpdateIntent {
    pub status: Option<CycleStatus>,
    pub highest_trailing_price: Option<Decimal>,
}

/// The combined output of a Strategy Core function: up to three
/// independent intents the caller executes in order, plus an optional
/// warning the caller surfaces (e.g. via logging) without mutating
/// anything — used when a decision is declined for an operator-relevant
/// reason rather than simply not triggering.
#[derive(Debug, Clone, Default)]
pub struct Action {
    pub order: Option<OrderIntent>,
    pub cycle_update: Option<CycleUpdateIntent>,
    pub ttp_update: Option<TTPUpdateIntent>,
    pub warning: Option<String>,
}

/// Multiplier applied to the ask price in testing mode to force immediate
/// fills against a simulated order book.
const TESTING_MODE_INFLATION: Decimal = dec!(1.05);

fn limit_price_for_buy(ask_price: Decimal, testing_mode: bool) -> Decimal {
    if testing_mode {
        ask_price * TESTING_MODE_INFLATION
    } else {
        ask_price
    }
}

fn live_position_qty(position: Option<&BrokerPosition>) -> Decimal {
    position.map(|p| p.qty).unwrap_or(Decimal::ZERO)
}

/// Iff the asset is enabled, the cycle is flat and `watching`, and no live
/// position (above dust) already exists, place a limit buy sized from
/// `baseOrderAmount` and move the cycle to `buying`.
pub fn decide_base_order(
    tick: MarketTick,
    asset: &AssetConfig,
    cycle: &Cycle,
    position: Option<&BrokerPosition>,
    testing_mode: bool,
) -> Option<Action> {
    if !asset.enabled || cycle.status != CycleStatus::Watching || cycle.quantity != Decimal::ZERO {
        return None;
    }
    if live_position_qty(position) >= MIN_ORDER_QTY {
        return None;
    }
    if tick.ask_price <= Decimal::ZERO || tick.bid_price <= Decimal::ZERO || asset.base_order_amount <= Decimal::ZERO {
        return None;
    }

    let limit_price = limit_price_for_buy(tick.ask_price, testing_mode);
    let qty = asset.base_order_amount / tick.ask_price;

    Some(Action {
        order: Some(OrderIntent {
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(limit_price),
        }),
        cycle_update: Some(CycleUpdateIntent {
            status: Some(CycleStatus::Buying),
        }),
        ttp_update: None,
        warning: None,
    })
}

/// Iff the asset is enabled, the cycle is `watching` with an open position,
/// safety orders remain available, and price has dropped far enough below
/// the last fill, place another limit buy and move the cycle to `buying`.
pub fn decide_safety_order(
    tick: MarketTick,
    asset: &AssetConfig,
    cycle: &Cycle,
    testing_mode: bool,
) -> Option<Action> {
    if !asset.enabled || cycle.status != CycleStatus::Watching || cycle.quantity <= Decimal::ZERO {
        return None;
    }
    if cycle.safety_orders >= asset.max_safety_orders {
        return None;
    }
    let last_fill_price = cycle.last_order_fill_price?;

    let trigger = last_fill_price * (Decimal::ONE - asset.safety_order_deviation_pct / dec!(100));
    if tick.ask_price > trigger {
        return None;
    }

    let limit_price = limit_price_for_buy(tick.ask_price, testing_mode);
    let qty = asset.safety_order_amount / tick.ask_price;

    Some(Action {
        order: Some(OrderIntent {
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(limit_price),
        }),
        cycle_update: Some(CycleUpdateIntent {
            status: Some(CycleStatus::Buying),
        }),
        ttp_update: None,
        warning: None,
    })
}

/// Iff the asset is enabled, the cycle is `watching` or `trailing` with an
/// open, priced position, and a safety order could not fire on this same
/// tick (buying beats selling), evaluate the take-profit / trailing
/// take-profit logic and emit a sell and/or TTP-arm/raise intent.
pub fn decide_take_profit(
    tick: MarketTick,
    asset: &AssetConfig,
    cycle: &Cycle,
    position: Option<&BrokerPosition>,
    testing_mode: bool,
) -> Option<Action> {
    if !asset.enabled
        || !matches!(cycle.status, CycleStatus::Watching | CycleStatus::Trailing)
        || cycle.quantity <= Decimal::ZERO
        || cycle.average_purchase_price <= Decimal::ZERO
    {
        return None;
    }

    // Buying beats selling on the same tick.
    if decide_safety_order(tick, asset, cycle, testing_mode).is_some() {
        return None;
    }

    let tp_trigger = cycle.average_purchase_price * (Decimal::ONE + asset.take_profit_pct / dec!(100));

    if !asset.ttp_enabled {
        if tick.bid_price >= tp_trigger {
            return sell_action(tick, cycle, position);
        }
        return None;
    }

    match cycle.status {
        CycleStatus::Watching => {
            if tick.bid_price >= tp_trigger {
                Some(Action {
                    order: None,
                    cycle_update: None,
                    ttp_update: Some(TTPUpdateIntent {
                        status: Some(CycleStatus::Trailing),
                        highest_trailing_price: Some(tick.bid_price),
                    }),
                    warning: None,
                })
            } else {
                None
            }
        }
        CycleStatus::Trailing => {
            let peak = cycle.highest_trailing_price.unwrap_or(Decimal::ZERO);
            if tick.bid_price > peak {
                return Some(Action {
                    order: None,
                    cycle_update: None,
                    ttp_update: Some(TTPUpdateIntent {
                        status: None,
                        highest_trailing_price: Some(tick.bid_price),
                    }),
                    warning: None,
                });
            }
            let sell_trigger = peak * (Decimal::ONE - asset.ttp_deviation_pct / dec!(100));
            if tick.bid_price < sell_trigger {
                return sell_action(tick, cycle, position);
            }
            None
        }
        _ => None,
    }
}

/// Builds the market-sell `Action` shared by both TTP branches, preferring
/// the live broker position quantity over the cycle's bookkeeping. When
/// the resulting quantity is dust, declines the sell (no order, no cycle
/// mutation — the cycle stays in its current status) and carries a
/// warning for the caller to surface.
fn sell_action(_tick: MarketTick, cycle: &Cycle, position: Option<&BrokerPosition>) -> Option<Action> {
    let qty = position.map(|p| p.qty).unwrap_or(cycle.quantity);
    if qty < MIN_ORDER_QTY {
        return Some(Action {
            order: None,
            cycle_update: None,
            ttp_update: None,
            warning: Some(format!(
                "take-profit sell declined for cycle {}: computed quantity {qty} is below the minimum order size {MIN_ORDER_QTY}",
                cycle.id
            )),
        });
    }
    Some(Action {
        order: Some(OrderIntent {
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
        }),
        cycle_update: Some(CycleUpdateIntent {
            status: Some(CycleStatus::Selling),
        }),
        ttp_update: None,
        warning: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn asset() -> AssetConfig {
        AssetConfig {
            id: 1,
            symbol: "BTC/USD".into(),
            enabled: true,
            base_order_amount: dec!(100),
            safety_order_amount: dec!(50),
            max_safety_orders: 2,
            safety_order_deviation_pct: dec!(2),
            take_profit_pct: dec!(1),
            ttp_enabled: false,
            ttp_deviation_pct: dec!(0.5),
            cooldown_seconds: 60,
            last_sell_price: None,
        }
    }

    fn watching_cycle() -> Cycle {
        let now = Utc::now();
        Cycle {
            id: 1,
            asset_id: 1,
            status: CycleStatus::Watching,
            quantity: Decimal::ZERO,
            average_purchase_price: Decimal::ZERO,
            safety_orders: 0,
            latest_order_id: None,
            latest_order_created_at: None,
            last_order_fill_price: None,
            highest_trailing_price: None,
            sell_price: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn base_order_fires_when_flat_and_watching() {
        let tick = MarketTick { bid_price: dec!(100), ask_price: dec!(101) };
        let action = decide_base_order(tick, &asset(), &watching_cycle(), None, false).unwrap();
        let order = action.order.unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.qty, dec!(100) / dec!(101));
        assert_eq!(order.limit_price, Some(dec!(101)));
        assert_eq!(action.cycle_update.unwrap().status, Some(CycleStatus::Buying));
    }

    #[test]
    fn base_order_inflates_limit_in_testing_mode() {
        let tick = MarketTick { bid_price: dec!(100), ask_price: dec!(100) };
        let action = decide_base_order(tick, &asset(), &watching_cycle(), None, true).unwrap();
        assert_eq!(action.order.unwrap().limit_price, Some(dec!(105.00)));
    }

    #[test]
    fn base_order_blocked_by_dust_threshold_residual_position() {
        let tick = MarketTick { bid_price: dec!(100), ask_price: dec!(101) };
        let tiny = BrokerPosition {
            symbol: "BTC/USD".into(),
            qty: dec!(0.000000001),
            avg_entry_price: dec!(100),
        };
        // below MIN_ORDER_QTY: dust is ignored, base order still fires
        assert!(decide_base_order(tick, &asset(), &watching_cycle(), Some(&tiny), false).is_some());

        let real = BrokerPosition {
            symbol: "BTC/USD".into(),
            qty: dec!(0.01),
            avg_entry_price: dec!(100),
        };
        assert!(decide_base_order(tick, &asset(), &watching_cycle(), Some(&real), false).is_none());
    }

    #[test]
    fn safety_order_fires_at_exact_trigger_tie() {
        let mut cycle = watching_cycle();
        cycle.quantity = dec!(1);
        cycle.last_order_fill_price = Some(dec!(100));
        // trigger = 100 * (1 - 2/100) = 98.00 exactly
        let tick = MarketTick { bid_price: dec!(97), ask_price: dec!(98) };
        assert!(decide_safety_order(tick, &asset(), &cycle, false).is_some());
    }

    #[test]
    fn safety_order_respects_max_safety_orders() {
        let mut cycle = watching_cycle();
        cycle.quantity = dec!(1);
        cycle.last_order_fill_price = Some(dec!(100));
        cycle.safety_orders = 2;
        let tick = MarketTick { bid_price: dec!(90), ask_price: dec!(90) };
        assert!(decide_safety_order(tick, &asset(), &cycle, false).is_none());
    }

    #[test]
    fn take_profit_sells_when_ttp_disabled_and_trigger_met() {
        let mut cycle = watching_cycle();
        cycle.quantity = dec!(1);
        cycle.average_purchase_price = dec!(100);
        cycle.last_order_fill_price = Some(dec!(100));
        // tp_trigger = 101; bid 101 sells. ask set far above safety trigger
        // so decide_safety_order does not preempt.
        let tick = MarketTick { bid_price: dec!(101), ask_price: dec!(101) };
        let action = decide_take_profit(tick, &asset(), &cycle, None, false).unwrap();
        let order = action.order.unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(action.cycle_update.unwrap().status, Some(CycleStatus::Selling));
    }

    #[test]
    fn take_profit_yields_to_safety_order_on_same_tick() {
        let mut cycle = watching_cycle();
        cycle.quantity = dec!(1);
        cycle.average_purchase_price = dec!(100);
        cycle.last_order_fill_price = Some(dec!(100));
        // ask 90 triggers safety order (<= 98), so take-profit must defer.
        let tick = MarketTick { bid_price: dec!(101), ask_price: dec!(90) };
        assert!(decide_take_profit(tick, &asset(), &cycle, None, false).is_none());
    }

    #[test]
    fn ttp_arms_trailing_on_trigger_without_order() {
        let mut a = asset();
        a.ttp_enabled = true;
        let mut cycle = watching_cycle();
        cycle.quantity = dec!(1);
        cycle.average_purchase_price = dec!(100);
        cycle.last_order_fill_price = Some(dec!(100));
        let tick = MarketTick { bid_price: dec!(101), ask_price: dec!(101) };
        let action = decide_take_profit(tick, &a, &cycle, None, false).unwrap();
        assert!(action.order.is_none());
        let ttp = action.ttp_update.unwrap();
        assert_eq!(ttp.status, Some(CycleStatus::Trailing));
        assert_eq!(ttp.highest_trailing_price, Some(dec!(101)));
    }

    #[test]
    fn ttp_raises_peak_while_trailing() {
        let mut a = asset();
        a.ttp_enabled = true;
        let mut cycle = watching_cycle();
        cycle.status = CycleStatus::Trailing;
        cycle.quantity = dec!(1);
        cycle.average_purchase_price = dec!(100);
        cycle.highest_trailing_price = Some(dec!(101));
        let tick = MarketTick { bid_price: dec!(102), ask_price: dec!(102) };
        let action = decide_take_profit(tick, &a, &cycle, None, false).unwrap();
        assert!(action.order.is_none());
        assert_eq!(action.ttp_update.unwrap().highest_trailing_price, Some(dec!(102)));
    }

    #[test]
    fn ttp_sells_on_deviation_from_peak() {
        let mut a = asset();
        a.ttp_enabled = true;
        a.ttp_deviation_pct = dec!(1);
        let mut cycle = watching_cycle();
        cycle.status = CycleStatus::Trailing;
        cycle.quantity = dec!(1);
        cycle.average_purchase_price = dec!(100);
        cycle.highest_trailing_price = Some(dec!(110));
        // sell trigger = 110 * 0.99 = 108.9; bid 108 sells
        let tick = MarketTick { bid_price: dec!(108), ask_price: dec!(108) };
        let action = decide_take_profit(tick, &a, &cycle, None, false).unwrap();
        let order = action.order.unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(action.cycle_update.unwrap().status, Some(CycleStatus::Selling));
    }

    #[test]
    fn sell_rejected_below_dust_threshold_leaves_cycle_trailing() {
        let mut a = asset();
        a.ttp_enabled = true;
        a.ttp_deviation_pct = dec!(1);
        let mut cycle = watching_cycle();
        cycle.status = CycleStatus::Trailing;
        cycle.quantity = dec!(0.000000001);
        cycle.average_purchase_price = dec!(100);
        cycle.highest_trailing_price = Some(dec!(110));
        let position = BrokerPosition {
            symbol: "BTC/USD".into(),
            qty: dec!(0.000000001),
            avg_entry_price: dec!(100),
        };
        let tick = MarketTick { bid_price: dec!(108), ask_price: dec!(108) };
        let action = decide_take_profit(tick, &a, &cycle, Some(&position), false).unwrap();
        assert!(action.order.is_none());
        assert!(action.cycle_update.is_none());
        assert!(action.ttp_update.is_none());
        assert!(action.warning.unwrap().contains("below the minimum order size"));
    }
}
