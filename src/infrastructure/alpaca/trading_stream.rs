//! Trade-update stream: Alpaca's account/order WebSocket, reporting order
//! lifecycle events (new/partial fill/fill/canceled/rejected/expired) with
//! auto-reconnect.

use crate::domain::model::{BrokerOrder, OrderSide, OrderStatus, OrderType, TradeEventKind, TradeUpdate};
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{self, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{error, info, warn};

const MAX_RECONNECT_DELAY_SECS: u64 = 30;
const PING_INTERVAL_SECS: u64 = 20;

#[derive(Debug, Deserialize)]
#[serde(tag = "stream")]
enum StreamMessage {
    #[serde(rename = "authorization")]
    Authorization { data: AuthData },
    #[serde(rename = "listening")]
    Listening { data: ListeningData },
    #[serde(rename = "trade_updates")]
    TradeUpdate { data: TradeUpdateData },
}

#[derive(Debug, Deserialize)]
struct AuthData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListeningData {
    streams: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TradeUpdateData {
    event: String,
    execution_id: Option<String>,
    price: Option<String>,
    qty: Option<String>,
    order: WireOrder,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    status: String,
    qty: String,
    #[serde(default)]
    filled_qty: String,
    filled_avg_price: Option<String>,
    limit_price: Option<String>,
    created_at: String,
}

fn map_event(event: &str) -> TradeEventKind {
    match event {
        "fill" => TradeEventKind::Fill,
        "partial_fill" => TradeEventKind::PartialFill,
        "canceled" => TradeEventKind::Canceled,
        "rejected" => TradeEventKind::Rejected,
        "expired" => TradeEventKind::Expired,
        _ => TradeEventKind::New,
    }
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

fn order_from_wire(o: WireOrder) -> BrokerOrder {
    BrokerOrder {
        id: o.id,
        symbol: o.symbol,
        side: if o.side == "sell" { OrderSide::Sell } else { OrderSide::Buy },
        order_type: if o.order_type == "market" { OrderType::Market } else { OrderType::Limit },
        status: map_status(&o.status),
        qty: Decimal::from_str(&o.qty).unwrap_or(Decimal::ZERO),
        filled_qty: Decimal::from_str(&o.filled_qty).unwrap_or(Decimal::ZERO),
        filled_avg_price: o.filled_avg_price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        limit_price: o.limit_price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        created_at: chrono::DateTime::parse_from_rfc3339(&o.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        filled_at: None,
        canceled_at: None,
    }
}

pub struct AlpacaTradeStream {
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl AlpacaTradeStream {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self { api_key, api_secret, base_url }
    }

    pub fn stream(&self) -> mpsc::Receiver<TradeUpdate> {
        let (tx, rx) = mpsc::channel(256);
        let api_key = self.api_key.clone();
        let api_secret = self.api_secret.clone();
        let ws_url = self.base_url.replace("https://", "wss://").replace("http://", "ws://") + "/stream";

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;
            loop {
                match Self::run_connection(&ws_url, &api_key, &api_secret, &tx).await {
                    Ok(_) => {
                        info!("AlpacaTradeStream: connection closed cleanly");
                        reconnect_attempts = 0;
                    }
                    Err(e) => {
                        error!("AlpacaTradeStream error: {e}. Reconnecting...");
                        let delay = std::cmp::min(2u64.pow(reconnect_attempts), MAX_RECONNECT_DELAY_SECS);
                        time::sleep(Duration::from_secs(delay)).await;
                        reconnect_attempts += 1;
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        rx
    }

    async fn run_connection(url: &str, key: &str, secret: &str, tx: &Sender<TradeUpdate>) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await.context("failed to connect to Alpaca trade stream")?;
        info!("AlpacaTradeStream: connected");

        let (mut write, mut read) = ws_stream.split();

        let auth_msg = serde_json::json!({
            "action": "authenticate",
            "data": { "key_id": key, "secret_key": secret }
        });
        write.send(Message::Text(auth_msg.to_string().into())).await?;

        let mut ping_interval = time::interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                Some(msg) = read.next() => {
                    match msg? {
                        Message::Text(text) => {
                            match serde_json::from_str::<StreamMessage>(&text) {
                                Ok(StreamMessage::Authorization { data }) => {
                                    if data.status == "authorized" {
                                        info!("AlpacaTradeStream: authenticated");
                                        let sub_msg = serde_json::json!({
                                            "action": "listen",
                                            "data": { "streams": ["trade_updates"] }
                                        });
                                        write.send(Message::Text(sub_msg.to_string().into())).await?;
                                    } else {
                                        return Err(anyhow::anyhow!("authentication failed: {}", data.status));
                                    }
                                }
                                Ok(StreamMessage::Listening { data }) => {
                                    info!("AlpacaTradeStream: subscribed to {:?}", data.streams);
                                }
                                Ok(StreamMessage::TradeUpdate { data }) => {
                                    let update = TradeUpdate {
                                        event: map_event(&data.event),
                                        fill_price: data.price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
                                        fill_qty: data.qty.as_deref().and_then(|q| Decimal::from_str(q).ok()),
                                        execution_id: data.execution_id,
                                        order: order_from_wire(data.order),
                                    };
                                    if tx.send(update).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                Err(_) => warn!("AlpacaTradeStream: unrecognized message: {text}"),
                            }
                        }
                        Message::Ping(payload) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }
}
