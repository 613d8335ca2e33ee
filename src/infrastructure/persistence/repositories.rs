use crate::domain::model::{AssetConfig, Cycle, CycleStatus};
use crate::domain::repositories::{AssetUpdate, CycleStore, CycleUpdate, NewCycle};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

/// `dca_assets`/`dca_cycles` backed `CycleStore`. Every mutation is a
/// single-row upsert or update; `update_cycle`'s read-modify-write runs
/// inside a `BEGIN IMMEDIATE` transaction so concurrent callers are
/// serialized by SQLite's own write lock rather than by any in-process
/// mutex.
pub struct SqliteCycleStore {
    database: Database,
}

impl SqliteCycleStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or(Decimal::ZERO)
}

fn parse_optional_decimal(s: Option<String>) -> Option<Decimal> {
    s.and_then(|s| Decimal::from_str(&s).ok())
}

fn asset_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AssetConfig> {
    Ok(AssetConfig {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        enabled: row.try_get("enabled")?,
        base_order_amount: parse_decimal(&row.try_get::<String, _>("base_order_amount")?),
        safety_order_amount: parse_decimal(&row.try_get::<String, _>("safety_order_amount")?),
        max_safety_orders: row.try_get("max_safety_orders")?,
        safety_order_deviation_pct: parse_decimal(
            &row.try_get::<String, _>("safety_order_deviation_pct")?,
        ),
        take_profit_pct: parse_decimal(&row.try_get::<String, _>("take_profit_pct")?),
        ttp_enabled: row.try_get("ttp_enabled")?,
        ttp_deviation_pct: parse_decimal(&row.try_get::<String, _>("ttp_deviation_pct")?),
        cooldown_seconds: row.try_get("cooldown_seconds")?,
        last_sell_price: parse_optional_decimal(row.try_get("last_sell_price")?),
    })
}

fn cycle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Cycle> {
    let status_str: String = row.try_get("status")?;
    Ok(Cycle {
        id: row.try_get("id")?,
        asset_id: row.try_get("asset_id")?,
        status: CycleStatus::from_str(&status_str)
            .map_err(|e| anyhow::anyhow!("invalid cycle status in store: {e}"))?,
        quantity: parse_decimal(&row.try_get::<String, _>("quantity")?),
        average_purchase_price: parse_decimal(
            &row.try_get::<String, _>("average_purchase_price")?,
        ),
        safety_orders: row.try_get("safety_orders")?,
        latest_order_id: row.try_get("latest_order_id")?,
        latest_order_created_at: row.try_get("latest_order_created_at")?,
        last_order_fill_price: parse_optional_decimal(row.try_get("last_order_fill_price")?),
        highest_trailing_price: parse_optional_decimal(row.try_get("highest_trailing_price")?),
        sell_price: parse_optional_decimal(row.try_get("sell_price")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl CycleStore for SqliteCycleStore {
    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetConfig>> {
        let row = sqlx::query("SELECT * FROM dca_assets WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to query dca_assets by symbol")?;
        row.as_ref().map(asset_from_row).transpose()
    }

    async fn get_asset_by_id(&self, id: i64) -> Result<Option<AssetConfig>> {
        let row = sqlx::query("SELECT * FROM dca_assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to query dca_assets by id")?;
        row.as_ref().map(asset_from_row).transpose()
    }

    async fn list_enabled_assets(&self) -> Result<Vec<AssetConfig>> {
        let rows = sqlx::query("SELECT * FROM dca_assets WHERE enabled = 1")
            .fetch_all(&self.database.pool)
            .await
            .context("failed to list enabled dca_assets")?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn update_asset(&self, id: i64, fields: AssetUpdate) -> Result<()> {
        if let Some(price) = fields.last_sell_price {
            sqlx::query("UPDATE dca_assets SET last_sell_price = $1 WHERE id = $2")
                .bind(price.to_string())
                .bind(id)
                .execute(&self.database.pool)
                .await
                .context("failed to update dca_assets.last_sell_price")?;
        }
        Ok(())
    }

    async fn get_latest_cycle(&self, asset_id: i64) -> Result<Option<Cycle>> {
        let row = sqlx::query(
            "SELECT * FROM dca_cycles WHERE asset_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("failed to query latest dca_cycles row")?;
        row.as_ref().map(cycle_from_row).transpose()
    }

    async fn find_cycle_by_order_id(&self, order_id: &str) -> Result<Option<Cycle>> {
        let row = sqlx::query("SELECT * FROM dca_cycles WHERE latest_order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to query dca_cycles by latest_order_id")?;
        row.as_ref().map(cycle_from_row).transpose()
    }

    async fn create_cycle(&self, fields: NewCycle) -> Result<Cycle> {
        let now: DateTime<Utc> = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO dca_cycles (
                asset_id, status, quantity, average_purchase_price,
                safety_orders, last_order_fill_price, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(fields.asset_id)
        .bind(fields.status.to_string())
        .bind(fields.quantity.to_string())
        .bind(fields.average_purchase_price.to_string())
        .bind(fields.safety_orders)
        .bind(fields.last_order_fill_price.map(|d| d.to_string()))
        .bind(now)
        .fetch_one(&self.database.pool)
        .await
        .context("failed to insert dca_cycles row")?;

        cycle_from_row(&row)
    }

    async fn update_cycle(&self, id: i64, fields: CycleUpdate) -> Result<()> {
        // Single-row read-modify-write, made atomic by running the SELECT
        // and the UPDATE inside one `BEGIN IMMEDIATE` transaction: SQLite
        // grants the write lock up front, so a concurrent writer's own
        // `BEGIN IMMEDIATE` blocks until this one commits rather than
        // interleaving its SELECT between our read and write.
        let mut tx = self
            .database
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("failed to open dca_cycles update transaction")?;

        let existing = sqlx::query("SELECT * FROM dca_cycles WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to fetch dca_cycles row for update")?
            .ok_or_else(|| anyhow::anyhow!("cycle {id} not found"))?;
        let mut cycle = cycle_from_row(&existing)?;

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

        sqlx::query(
            r#"
            UPDATE dca_cycles SET
                status = $1,
                quantity = $2,
                average_purchase_price = $3,
                safety_orders = $4,
                latest_order_id = $5,
                latest_order_created_at = $6,
                last_order_fill_price = $7,
                highest_trailing_price = $8,
                sell_price = $9,
                completed_at = $10,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $11
            "#,
        )
        .bind(cycle.status.to_string())
        .bind(cycle.quantity.to_string())
        .bind(cycle.average_purchase_price.to_string())
        .bind(cycle.safety_orders)
        .bind(cycle.latest_order_id)
        .bind(cycle.latest_order_created_at)
        .bind(cycle.last_order_fill_price.map(|d| d.to_string()))
        .bind(cycle.highest_trailing_price.map(|d| d.to_string()))
        .bind(cycle.sell_price.map(|d| d.to_string()))
        .bind(cycle.completed_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("failed to update dca_cycles row")?;

        tx.commit().await.context("failed to commit dca_cycles update transaction")?;

        Ok(())
    }

    async fn list_cycles_by_status(&self, status: CycleStatus) -> Result<Vec<Cycle>> {
        let rows = sqlx::query("SELECT * FROM dca_cycles WHERE status = $1")
            .bind(status.to_string())
            .fetch_all(&self.database.pool)
            .await
            .context("failed to list dca_cycles by status")?;
        rows.iter().map(cycle_from_row).collect()
    }
}
