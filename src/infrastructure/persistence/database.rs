use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Pooled SQLite connection backing the Cycle Store.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Creates the `dca_assets` and `dca_cycles` tables and their indexes if
    /// absent. Idempotent: safe to run on every startup.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dca_assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                base_order_amount TEXT NOT NULL,
                safety_order_amount TEXT NOT NULL,
                max_safety_orders INTEGER NOT NULL,
                safety_order_deviation_pct TEXT NOT NULL,
                take_profit_pct TEXT NOT NULL,
                ttp_enabled BOOLEAN NOT NULL DEFAULT 0,
                ttp_deviation_pct TEXT NOT NULL DEFAULT '0',
                cooldown_seconds INTEGER NOT NULL DEFAULT 60,
                last_sell_price TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create dca_assets table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dca_cycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id INTEGER NOT NULL REFERENCES dca_assets(id),
                status TEXT NOT NULL,
                quantity TEXT NOT NULL DEFAULT '0',
                average_purchase_price TEXT NOT NULL DEFAULT '0',
                safety_orders INTEGER NOT NULL DEFAULT 0,
                latest_order_id TEXT,
                latest_order_created_at DATETIME,
                last_order_fill_price TEXT,
                highest_trailing_price TEXT,
                sell_price TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                completed_at DATETIME
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create dca_cycles table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dca_cycles_asset_created
            ON dca_cycles (asset_id, created_at DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create dca_cycles asset/created index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dca_cycles_latest_order
            ON dca_cycles (latest_order_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create dca_cycles latest_order_id index")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
