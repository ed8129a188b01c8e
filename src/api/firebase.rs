use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SignalSettings;
use crate::error::BotError;
use crate::models::{OrderRecord, SignalEvent};
use crate::persistence::OrderSink;
use crate::Result;

/// Realtime database client: signal subscription and order storage
///
/// Talks to the REST interface; subscriptions use its Server-Sent Events
/// stream (`Accept: text/event-stream`).
#[derive(Clone)]
pub struct FirebaseClient {
    /// One-shot reads and writes, bounded end to end
    client: Client,
    /// Subscription stream, only the connect is bounded
    stream_client: Client,
    database_url: String,
    auth: Option<String>,
    reconnect_delay: Duration,
}

/// Body of a `put`/`patch` frame
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Why a single stream connection ended
#[derive(Debug, PartialEq)]
enum StreamEnd {
    Closed,
    ReceiverDropped,
}

impl FirebaseClient {
    pub fn new(settings: &SignalSettings) -> Result<Self> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()?;
        let stream_client = Client::builder().connect_timeout(request_timeout).build()?;

        Ok(Self {
            client,
            stream_client,
            database_url: settings.database_url.trim_end_matches('/').to_string(),
            auth: settings.auth.clone(),
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs.max(1)),
        })
    }

    fn url(&self, path: &str) -> String {
        let mut url = format!("{}/{}.json", self.database_url, path.trim_matches('/'));
        if let Some(auth) = &self.auth {
            url.push_str("?auth=");
            url.push_str(auth);
        }
        url
    }

    /// Read the current value stored under `key`
    pub async fn get_signal(&self, key: &str) -> Result<Value> {
        let response = self.client.get(self.url(key)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Exchange {
                status: status.as_u16(),
                message: format!("reading {}", key),
            });
        }
        let value: Value = response.json().await?;
        tracing::debug!("[get_signal] Key: {} Data: {}", key, value);
        Ok(value)
    }

    /// Follow `key` forever, forwarding `put`/`patch` events into `tx`
    ///
    /// Reconnects after `reconnect_delay` whenever the stream ends or fails.
    /// Returns once the receiving side is dropped.
    pub async fn stream_signal(&self, key: &str, tx: mpsc::Sender<SignalEvent>) {
        tracing::info!("[stream_signal] Listening on /{}", key);

        loop {
            match self.stream_once(key, &tx).await {
                Ok(StreamEnd::ReceiverDropped) => {
                    tracing::info!("Signal receiver dropped, stopping stream on /{}", key);
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    tracing::warn!("Signal stream on /{} closed, reconnecting", key);
                }
                Err(e) => {
                    tracing::error!("Signal stream on /{} failed: {}", key, e);
                }
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn stream_once(&self, key: &str, tx: &mpsc::Sender<SignalEvent>) -> Result<StreamEnd> {
        let response = self
            .stream_client
            .get(self.url(key))
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Exchange {
                status: status.as_u16(),
                message: format!("subscribing to {}", key),
            });
        }

        let mut parser = SseParser::default();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for (event, data) in parser.push(&chunk) {
                match event.as_str() {
                    "put" | "patch" => {
                        let signal_event = match decode_event(&event, &data) {
                            Ok(ev) => ev,
                            Err(e) => {
                                tracing::warn!("Skipping malformed {} frame: {}", event, e);
                                continue;
                            }
                        };
                        if tx.send(signal_event).await.is_err() {
                            return Ok(StreamEnd::ReceiverDropped);
                        }
                    }
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        return Err(BotError::InvalidResponse(format!(
                            "stream {} by server: {}",
                            event, data
                        )));
                    }
                    other => tracing::debug!("Ignoring stream event {}", other),
                }
            }
        }

        Ok(StreamEnd::Closed)
    }
}

#[async_trait]
impl OrderSink for FirebaseClient {
    /// Stored under `orders/{account}/{order_id}`
    async fn store_order(&self, account: &str, record: &OrderRecord) -> Result<()> {
        let path = format!("orders/{}/{}", account, record.id);
        let response = self.client.put(self.url(&path)).json(record).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Exchange {
                status: status.as_u16(),
                message: format!("storing order {}", record.id),
            });
        }
        tracing::debug!("Order stored for {} - ID: {}", account, record.id);
        Ok(())
    }
}

fn decode_event(event: &str, data: &str) -> Result<SignalEvent> {
    let payload: StreamPayload = serde_json::from_str(data)?;
    Ok(SignalEvent {
        event: event.to_string(),
        path: payload.path,
        data: payload.data,
    })
}

/// Incremental `text/event-stream` frame parser
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed raw bytes; returns every `(event, data)` frame completed by them
    fn push(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.event.take() {
                    frames.push((event, self.data.join("\n")));
                }
                self.data.clear();
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
        }

        frames
    }
}
