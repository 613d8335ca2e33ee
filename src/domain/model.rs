//! Core data model: asset configuration and the per-asset cycle state
//! machine, plus their cross-field invariants.

use crate::domain::errors::DcaError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alpaca's minimum tradable quantity for crypto; residual positions below
/// this are dust and never block a new base order.
pub const MIN_ORDER_QTY: Decimal = rust_decimal_macros::dec!(0.000000002);

#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub id: i64,
    pub symbol: String,
    pub enabled: bool,
    pub base_order_amount: Decimal,
    pub safety_order_amount: Decimal,
    pub max_safety_orders: i32,
    pub safety_order_deviation_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub ttp_enabled: bool,
    pub ttp_deviation_pct: Decimal,
    pub cooldown_seconds: i64,
    pub last_sell_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Watching,
    Buying,
    Selling,
    Trailing,
    Cooldown,
    Complete,
    Error,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Watching => "watching",
            CycleStatus::Buying => "buying",
            CycleStatus::Selling => "selling",
            CycleStatus::Trailing => "trailing",
            CycleStatus::Cooldown => "cooldown",
            CycleStatus::Complete => "complete",
            CycleStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CycleStatus {
    type Err = DcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watching" => Ok(CycleStatus::Watching),
            "buying" => Ok(CycleStatus::Buying),
            "selling" => Ok(CycleStatus::Selling),
            "trailing" => Ok(CycleStatus::Trailing),
            "cooldown" => Ok(CycleStatus::Cooldown),
            "complete" => Ok(CycleStatus::Complete),
            "error" => Ok(CycleStatus::Error),
            other => Err(DcaError::ProtocolInvariantViolation {
                detail: format!("unknown cycle status {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: i64,
    pub asset_id: i64,
    pub status: CycleStatus,
    pub quantity: Decimal,
    pub average_purchase_price: Decimal,
    pub safety_orders: i32,
    pub latest_order_id: Option<String>,
    pub latest_order_created_at: Option<DateTime<Utc>>,
    pub last_order_fill_price: Option<Decimal>,
    pub highest_trailing_price: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Cycle {
    /// Checks the six invariants of the cycle/asset data model against this
    /// cycle in isolation (invariant 6, the at-most-one-active-cycle rule,
    /// is a Cycle Store-wide property and is checked there instead).
    pub fn validate(&self, asset: &AssetConfig) -> Result<(), DcaError> {
        if self.quantity < Decimal::ZERO {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!("cycle {} has negative quantity {}", self.id, self.quantity),
            });
        }
        if self.average_purchase_price < Decimal::ZERO {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!(
                    "cycle {} has negative average_purchase_price {}",
                    self.id, self.average_purchase_price
                ),
            });
        }
        if self.quantity == Decimal::ZERO && self.average_purchase_price != Decimal::ZERO {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!(
                    "cycle {} has zero quantity but nonzero average_purchase_price {}",
                    self.id, self.average_purchase_price
                ),
            });
        }
        if self.safety_orders < 0 || self.safety_orders > asset.max_safety_orders {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!(
                    "cycle {} has safety_orders {} outside [0, {}]",
                    self.id, self.safety_orders, asset.max_safety_orders
                ),
            });
        }
        if self.status == CycleStatus::Trailing {
            let peak_ok = self.highest_trailing_price.is_some_and(|p| p > Decimal::ZERO);
            if !asset.ttp_enabled || !peak_ok || self.quantity <= Decimal::ZERO {
                return Err(DcaError::ProtocolInvariantViolation {
                    detail: format!(
                        "cycle {} is trailing without ttp_enabled/peak/quantity invariants holding",
                        self.id
                    ),
                });
            }
        }
        if matches!(self.status, CycleStatus::Buying | CycleStatus::Selling)
            && self.latest_order_id.is_none()
        {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!(
                    "cycle {} is {} but has no latest_order_id",
                    self.id, self.status
                ),
            });
        }
        if self.status == CycleStatus::Complete
            && (self.completed_at.is_none() || self.quantity != Decimal::ZERO)
        {
            return Err(DcaError::ProtocolInvariantViolation {
                detail: format!(
                    "cycle {} is complete but completed_at/quantity invariant violated",
                    self.id
                ),
            });
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.status, CycleStatus::Complete | CycleStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// A broker order as returned by `getOrder`/`listOpenOrders`.
#[derive(Debug, Clone)]
pub struct BrokerOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

/// A live broker position for a symbol.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
}

/// A market quote delivered by `streamQuotes`.
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventKind {
    New,
    PartialFill,
    Fill,
    Canceled,
    Rejected,
    Expired,
}

/// A trade-update event delivered by `streamTradeUpdates`.
#[derive(Debug, Clone)]
pub struct TradeUpdate {
    pub event: TradeEventKind,
    pub order: BrokerOrder,
    pub fill_price: Option<Decimal>,
    pub fill_qty: Option<Decimal>,
    pub execution_id: Option<String>,
}

/// Supported quote currencies for crypto pairs, longest first so `USDT` is
/// preferred over the `USD` suffix it contains.
const CRYPTO_QUOTE_CURRENCIES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH"];

/// Normalizes a broker symbol (`BTCUSD`) into the slash form (`BTC/USD`)
/// used everywhere upstream of the Broker Gateway.
pub fn normalize_crypto_symbol(symbol: &str) -> Result<String, String> {
    if symbol.contains('/') {
        return Ok(symbol.to_string());
    }
    if symbol.is_empty() {
        return Err("cannot normalize empty symbol".to_string());
    }
    for quote in CRYPTO_QUOTE_CURRENCIES {
        if symbol.ends_with(quote) && symbol.len() > quote.len() {
            let base = &symbol[..symbol.len() - quote.len()];
            if !base.is_empty() && base.chars().all(|c| c.is_ascii_uppercase()) {
                return Ok(format!("{base}/{quote}"));
            }
        }
    }
    Err(format!("unable to normalize symbol: {symbol}"))
}
