//! REST order placement, cancellation, and position/order lookups against
//! Alpaca's crypto trading API.

use crate::domain::model::{BrokerOrder, BrokerPosition, OrderSide, OrderStatus, OrderType};
use crate::infrastructure::alpaca::common::{AlpacaOrder, AlpacaPosition};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

/// Consecutive-failure threshold past which order REST calls fail fast
/// instead of piling onto an already-unhealthy Alpaca endpoint.
const FAILURE_THRESHOLD: usize = 5;
const SUCCESS_THRESHOLD: usize = 2;
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AlpacaExecution {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    circuit: CircuitBreaker,
}

fn unwrap_circuit<T>(result: std::result::Result<T, CircuitBreakerError<anyhow::Error>>) -> Result<T> {
    result.map_err(|e| match e {
        CircuitBreakerError::Open(msg) => anyhow::anyhow!(msg),
        CircuitBreakerError::Inner(err) => err,
    })
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    symbol: String,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_rfc3339(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" => OrderStatus::Canceled,
        "rejected" => OrderStatus::Rejected,
        "expired" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

fn order_from_wire(ao: AlpacaOrder) -> BrokerOrder {
    BrokerOrder {
        id: ao.id,
        symbol: ao.symbol,
        side: if ao.side == "sell" { OrderSide::Sell } else { OrderSide::Buy },
        order_type: if ao.order_type == "market" { OrderType::Market } else { OrderType::Limit },
        status: map_status(&ao.status),
        qty: Decimal::from_str(&ao.qty).unwrap_or(Decimal::ZERO),
        filled_qty: Decimal::from_str(&ao.filled_qty).unwrap_or(Decimal::ZERO),
        filled_avg_price: ao.filled_avg_price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        limit_price: ao.limit_price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        created_at: parse_rfc3339(&ao.created_at),
        filled_at: parse_optional_rfc3339(ao.filled_at.as_deref()),
        canceled_at: parse_optional_rfc3339(ao.canceled_at.as_deref()),
    }
}

impl AlpacaExecution {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
            circuit: CircuitBreaker::new("alpaca-execution", FAILURE_THRESHOLD, SUCCESS_THRESHOLD, OPEN_TIMEOUT),
        }
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<BrokerOrder> {
        let body = serde_json::to_string(req).context("failed to serialize order request")?;
        let result = self
            .circuit
            .call(async {
                let url = format!("{}/v2/orders", self.base_url);
                let response = self
                    .client
                    .post(&url)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .context("failed to send order to Alpaca")?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Alpaca order submission rejected: {error_text}");
                }

                let ao: AlpacaOrder = response.json().await.context("failed to parse Alpaca order response")?;
                Ok(order_from_wire(ao))
            })
            .await;
        unwrap_circuit(result)
    }

    pub async fn submit_limit_buy(&self, symbol: &str, qty: Decimal, limit_price: Decimal) -> Result<BrokerOrder> {
        self.place_order(&OrderRequest {
            symbol: symbol.to_string(),
            qty: qty.to_string(),
            side: "buy",
            order_type: "limit",
            time_in_force: "gtc",
            limit_price: Some(limit_price.to_string()),
        })
        .await
    }

    pub async fn submit_market_sell(&self, symbol: &str, qty: Decimal) -> Result<BrokerOrder> {
        self.place_order(&OrderRequest {
            symbol: symbol.to_string(),
            qty: qty.to_string(),
            side: "sell",
            order_type: "market",
            time_in_force: "gtc",
            limit_price: None,
        })
        .await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let result = self
            .circuit
            .call(async {
                let url = format!("{}/v2/orders/{}", self.base_url, order_id);
                let response = self
                    .client
                    .delete(&url)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .send()
                    .await
                    .context("failed to cancel Alpaca order")?;

                if !response.status().is_success() && response.status().as_u16() != 404 {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Alpaca order cancellation failed: {error_text}");
                }
                Ok(())
            })
            .await;
        unwrap_circuit(result)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        let result = self
            .circuit
            .call(async {
                let url = format!("{}/v2/orders/{}", self.base_url, order_id);
                let response = self
                    .client
                    .get(&url)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .send()
                    .await
                    .context("failed to fetch Alpaca order")?;

                if response.status().as_u16() == 404 {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Alpaca order fetch failed: {error_text}");
                }

                let ao: AlpacaOrder = response.json().await.context("failed to parse Alpaca order")?;
                Ok(Some(order_from_wire(ao)))
            })
            .await;
        unwrap_circuit(result)
    }

    pub async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>> {
        let result = self
            .circuit
            .call(async {
                let url = format!("{}/v2/orders", self.base_url);
                let url_with_query = build_url_with_query(&url, &[("status", "open"), ("limit", "500")]);

                let response = self
                    .client
                    .get(&url_with_query)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .send()
                    .await
                    .context("failed to fetch open Alpaca orders")?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Alpaca open orders fetch failed: {error_text}");
                }

                let orders: Vec<AlpacaOrder> = response.json().await.context("failed to parse open orders")?;
                Ok(orders.into_iter().map(order_from_wire).collect())
            })
            .await;
        unwrap_circuit(result)
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        let result = self
            .circuit
            .call(async {
                let encoded = symbol.replace('/', "%2F");
                let url = format!("{}/v2/positions/{}", self.base_url, encoded);
                let response = self
                    .client
                    .get(&url)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .send()
                    .await
                    .context("failed to fetch Alpaca position")?;

                if response.status().as_u16() == 404 {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Alpaca position fetch failed: {error_text}");
                }

                let ap: AlpacaPosition = response.json().await.context("failed to parse Alpaca position")?;
                Ok(Some(BrokerPosition {
                    symbol: ap.symbol,
                    qty: Decimal::from_str(&ap.qty).unwrap_or(Decimal::ZERO),
                    avg_entry_price: Decimal::from_str(&ap.avg_entry_price).unwrap_or(Decimal::ZERO),
                }))
            })
            .await;
        unwrap_circuit(result)
    }
}
