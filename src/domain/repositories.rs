//! Repository abstraction for the Cycle Store: persistent asset
//! configurations and cycles, with single-row atomic read-modify-write.

use crate::domain::model::{AssetConfig, Cycle, CycleStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Partial update to a cycle row — only supplied (`Some`) fields change.
#[derive(Debug, Clone, Default)]
pub struct CycleUpdate {
    pub status: Option<CycleStatus>,
    pub quantity: Option<Decimal>,
    pub average_purchase_price: Option<Decimal>,
    pub safety_orders: Option<i32>,
    pub latest_order_id: Option<Option<String>>,
    pub latest_order_created_at: Option<Option<DateTime<Utc>>>,
    pub last_order_fill_price: Option<Option<Decimal>>,
    pub highest_trailing_price: Option<Option<Decimal>>,
    pub sell_price: Option<Option<Decimal>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl CycleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: CycleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn quantity(mut self, qty: Decimal) -> Self {
        self.quantity = Some(qty);
        self
    }

    pub fn average_purchase_price(mut self, price: Decimal) -> Self {
        self.average_purchase_price = Some(price);
        self
    }

    pub fn safety_orders(mut self, count: i32) -> Self {
        self.safety_orders = Some(count);
        self
    }

    pub fn latest_order_id(mut self, id: Option<String>) -> Self {
        self.latest_order_id = Some(id);
        self
    }

    pub fn latest_order_created_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.latest_order_created_at = Some(at);
        self
    }

    pub fn last_order_fill_price(mut self, price: Option<Decimal>) -> Self {
        self.last_order_fill_price = Some(price);
        self
    }

    pub fn highest_trailing_price(mut self, price: Option<Decimal>) -> Self {
        self.highest_trailing_price = Some(price);
        self
    }

    pub fn sell_price(mut self, price: Option<Decimal>) -> Self {
        self.sell_price = Some(price);
        self
    }

    pub fn completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Partial update to an asset row — only supplied fields change.
#[derive(Debug, Clone, Default)]
pub struct AssetUpdate {
    pub last_sell_price: Option<Decimal>,
}

/// Fields required to create a new cycle row.
#[derive(Debug, Clone)]
pub struct NewCycle {
    pub asset_id: i64,
    pub status: CycleStatus,
    pub quantity: Decimal,
    pub average_purchase_price: Decimal,
    pub safety_orders: i32,
    pub last_order_fill_price: Option<Decimal>,
}

impl NewCycle {
    /// A fresh `watching` cycle with zeroed financials, as created after
    /// cooldown release or as a repair cycle by the Consistency Checker.
    pub fn watching(asset_id: i64) -> Self {
        Self {
            asset_id,
            status: CycleStatus::Watching,
            quantity: Decimal::ZERO,
            average_purchase_price: Decimal::ZERO,
            safety_orders: 0,
            last_order_fill_price: None,
        }
    }

    /// A `cooldown` cycle created immediately after a predecessor sells.
    pub fn cooldown(asset_id: i64) -> Self {
        Self {
            status: CycleStatus::Cooldown,
            ..Self::watching(asset_id)
        }
    }
}

#[async_trait]
pub trait CycleStore: Send + Sync {
    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetConfig>>;
    async fn get_asset_by_id(&self, id: i64) -> Result<Option<AssetConfig>>;
    async fn list_enabled_assets(&self) -> Result<Vec<AssetConfig>>;
    async fn update_asset(&self, id: i64, fields: AssetUpdate) -> Result<()>;

    /// Most recent cycle for the asset by `created_at`.
    async fn get_latest_cycle(&self, asset_id: i64) -> Result<Option<Cycle>>;
    async fn find_cycle_by_order_id(&self, order_id: &str) -> Result<Option<Cycle>>;
    async fn create_cycle(&self, fields: NewCycle) -> Result<Cycle>;
    async fn update_cycle(&self, id: i64, fields: CycleUpdate) -> Result<()>;

    /// All cycles with `status` not in `{complete, error}`, for the
    /// reconciliation workers' per-status scans.
    async fn list_cycles_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>>;
}
