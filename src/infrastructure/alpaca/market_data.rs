//! Crypto quote stream: connects to Alpaca's market-data WebSocket,
//! authenticates, subscribes to the requested symbols, and republishes
//! best bid/ask as domain `Quote`s with auto-reconnect.

use crate::domain::model::Quote;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{self, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{error, info, warn};

const MAX_RECONNECT_DELAY_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum StreamMessage {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error { msg: String, code: i64 },
    #[serde(rename = "q")]
    Quote(QuoteMessage),
}

#[derive(Debug, Deserialize)]
struct QuoteMessage {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "bp")]
    bid_price: f64,
    #[serde(rename = "ap")]
    ask_price: f64,
    #[serde(rename = "t")]
    timestamp: String,
}

pub struct AlpacaQuoteStream {
    api_key: String,
    api_secret: String,
    ws_url: String,
}

impl AlpacaQuoteStream {
    pub fn new(api_key: String, api_secret: String, ws_url: String) -> Self {
        Self { api_key, api_secret, ws_url }
    }

    /// Spawns the auto-reconnecting background task and returns the channel
    /// it republishes quotes on.
    pub fn stream(&self, symbols: Vec<String>) -> mpsc::Receiver<Quote> {
        let (tx, rx) = mpsc::channel(256);
        let api_key = self.api_key.clone();
        let api_secret = self.api_secret.clone();
        let ws_url = self.ws_url.clone();

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;
            loop {
                match Self::run_connection(&ws_url, &api_key, &api_secret, &symbols, &tx).await {
                    Ok(_) => {
                        info!("AlpacaQuoteStream: connection closed cleanly");
                        reconnect_attempts = 0;
                    }
                    Err(e) => {
                        error!("AlpacaQuoteStream error: {e}. Reconnecting...");
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

    async fn run_connection(
        url: &str,
        key: &str,
        secret: &str,
        symbols: &[String],
        tx: &Sender<Quote>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await.context("failed to connect to Alpaca quote stream")?;
        info!("AlpacaQuoteStream: connected");

        let (mut write, mut read) = ws_stream.split();

        let auth_msg = serde_json::json!({
            "action": "auth",
            "key": key,
            "secret": secret,
        });
        write.send(Message::Text(auth_msg.to_string().into())).await?;

        let sub_msg = serde_json::json!({
            "action": "subscribe",
            "quotes": symbols,
        });
        write.send(Message::Text(sub_msg.to_string().into())).await?;

        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => {
                    let parsed: Result<Vec<StreamMessage>, _> = serde_json::from_str(&text);
                    match parsed {
                        Ok(messages) => {
                            for m in messages {
                                match m {
                                    StreamMessage::Success { msg } => {
                                        info!("AlpacaQuoteStream: {msg}");
                                    }
                                    StreamMessage::Error { msg, code } => {
                                        return Err(anyhow::anyhow!("Alpaca stream error {code}: {msg}"));
                                    }
                                    StreamMessage::Quote(q) => {
                                        let quote = Quote {
                                            symbol: q.symbol,
                                            bid_price: Decimal::from_str(&q.bid_price.to_string())
                                                .unwrap_or(Decimal::ZERO),
                                            ask_price: Decimal::from_str(&q.ask_price.to_string())
                                                .unwrap_or(Decimal::ZERO),
                                            timestamp: DateTime::parse_from_rfc3339(&q.timestamp)
                                                .map(|dt| dt.with_timezone(&Utc))
                                                .unwrap_or_else(|_| Utc::now()),
                                        };
                                        if tx.send(quote).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                }
                            }
                        }
                        Err(_) => warn!("AlpacaQuoteStream: unrecognized message: {text}"),
                    }
                }
                Message::Close(_) => return Ok(()),
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
