use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::BotError;
use crate::Result;

/// Latest traded price, shared between the stream task and its readers
///
/// Stored as f64 bits in an atomic so reads never wait on the writer.
/// Zero means "no price yet".
#[derive(Debug, Clone, Default)]
pub struct PriceFeed {
    bits: Arc<AtomicU64>,
}

impl PriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new price; non-positive or non-finite values clear the cell
    pub fn set(&self, price: f64) {
        let bits = if price.is_finite() && price > 0.0 {
            price.to_bits()
        } else {
            0
        };
        self.bits.store(bits, Ordering::Release);
    }

    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }

    pub fn latest(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            0 => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Poll until a price shows up or `timeout` elapses; true if one did
    pub async fn wait_until_ready(&self, timeout: Duration, poll: Duration) -> bool {
        let start = Instant::now();
        while self.latest().is_none() {
            if start.elapsed() > timeout {
                tracing::error!("Price feed unavailable after {:?}", timeout);
                return false;
            }
            tracing::info!("Awaiting price feed...");
            tokio::time::sleep(poll).await;
        }
        true
    }
}

/// Binance trade message; only the price matters here
#[derive(Debug, Deserialize)]
struct TradeMessage {
    #[serde(rename = "p")]
    price: String,
}

fn parse_trade_price(text: &str) -> Result<f64> {
    let trade: TradeMessage = serde_json::from_str(text)?;
    trade
        .price
        .parse::<f64>()
        .map_err(|_| BotError::InvalidResponse(format!("bad trade price {:?}", trade.price)))
}

/// Connect once and feed every trade price into `feed` until the socket ends
async fn stream_prices(url: &str, feed: &PriceFeed) -> Result<()> {
    let (ws_stream, _response) = connect_async(url).await?;
    tracing::info!(url = %url, "Price stream connected");
    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match parse_trade_price(&text) {
                Ok(price) => feed.set(price),
                Err(e) => tracing::debug!(error = %e, "Ignoring price stream message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

/// Keep `feed` updated from a trade websocket forever, reconnecting on failure
pub async fn run_price_stream(url: String, feed: PriceFeed, reconnect_delay: Duration) {
    loop {
        match stream_prices(&url, &feed).await {
            Ok(()) => tracing::warn!(url = %url, "Price stream ended"),
            Err(e) => tracing::error!(url = %url, error = %e, "Price stream failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}
