//! Shared wire types for Alpaca's REST and streaming crypto APIs.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AlpacaOrder {
    pub id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub status: String,
    pub qty: String,
    #[serde(default)]
    pub filled_qty: String,
    pub filled_avg_price: Option<String>,
    pub limit_price: Option<String>,
    pub created_at: String,
    pub filled_at: Option<String>,
    pub canceled_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlpacaPosition {
    pub symbol: String,
    pub qty: String,
    pub avg_entry_price: String,
}
