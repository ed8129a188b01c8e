use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::ExchangeGateway;
use crate::config::ExchangeSettings;
use crate::error::BotError;
use crate::models::{
    lenient_f64, Balance, Bracket, Market, Order, OrderRequest, OrderStatus, OrderType, Position,
    Side,
};
use crate::Result;

// Delta Exchange REST API v2
// Docs: https://docs.delta.exchange
const USER_AGENT: &str = "trailbot-rust";

type HmacSha256 = Hmac<Sha256>;

type DeltaRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Delta Exchange client
///
/// Cloneable; clones share the rate limiter, the market cache and the order
/// lock. Order-mutating calls are serialized through that lock so the
/// signal path and the trailing monitor never interleave placements.
#[derive(Clone)]
pub struct DeltaClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    request_timeout: Duration,
    market_cache_ttl: Duration,
    market_cache: Arc<RwLock<Option<(Instant, Vec<Market>)>>>,
    rate_limiter: Arc<DeltaRateLimiter>,
    order_lock: Arc<Mutex<()>>,
}

impl DeltaClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        tracing::debug!("DeltaClient initialized for {}", settings.base_url);

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            request_timeout,
            market_cache_ttl: Duration::from_secs(settings.market_cache_ttl_secs),
            market_cache: Arc::new(RwLock::new(None)),
            rate_limiter,
            order_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Hex HMAC-SHA256 of `method + timestamp + path + query + body`
    fn sign(
        &self,
        method: &str,
        timestamp: &str,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<String> {
        let payload = format!("{}{}{}{}{}", method, timestamp, path, query, body);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| {
            BotError::Config(config::ConfigError::Message(format!("invalid API secret: {}", e)))
        })?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signed request; returns the `result` member of the response envelope
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let query_string = if query.is_empty() {
            String::new()
        } else {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("?{}", pairs.join("&"))
        };
        let body_string = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(method.as_str(), &timestamp, path, &query_string, &body_string)?;

        let url = format!("{}{}{}", self.base_url, path, query_string);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("api-key", &self.api_key)
            .header("timestamp", &timestamp)
            .header("signature", signature)
            .header("Content-Type", "application/json");
        if body.is_some() {
            builder = builder.body(body_string);
        }

        let call = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, BotError>((status, text))
        };
        let (status, text) = tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| BotError::Timeout(format!("{} {}", method, path)))??;

        let envelope: Value = serde_json::from_str(&text).map_err(|_| BotError::Exchange {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        })?;

        let success = envelope.get("success").and_then(Value::as_bool).unwrap_or(true);
        if !status.is_success() || !success {
            let message = envelope
                .get("error")
                .map(|e| {
                    e.get("code")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .unwrap_or_else(|| status.to_string());
            return Err(BotError::Exchange {
                status: status.as_u16(),
                message,
            });
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Product id of an exact symbol, from the cached market list
    pub async fn product_id(&self, symbol: &str) -> Result<u64> {
        self.load_markets(false)
            .await?
            .iter()
            .find(|m| m.symbol == symbol)
            .map(|m| m.id)
            .ok_or_else(|| BotError::MarketNotFound(symbol.to_string()))
    }
}

#[async_trait]
impl ExchangeGateway for DeltaClient {
    async fn load_markets(&self, reload: bool) -> Result<Vec<Market>> {
        if !reload {
            if let Some((loaded_at, markets)) = self.market_cache.read().await.as_ref() {
                if loaded_at.elapsed() < self.market_cache_ttl {
                    tracing::debug!("Returning cached market data");
                    return Ok(markets.clone());
                }
            }
        }

        let result = self.request(Method::GET, "/v2/products", &[], None).await?;
        let markets: Vec<Market> = as_array(&result)?.iter().filter_map(parse_market).collect();
        tracing::debug!("Markets loaded: {}", markets.len());

        *self.market_cache.write().await = Some((Instant::now(), markets.clone()));
        Ok(markets)
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>> {
        let result = self
            .request(Method::GET, "/v2/wallet/balances", &[], None)
            .await?;
        let balances: Vec<Balance> = as_array(&result)?.iter().filter_map(parse_balance).collect();
        tracing::debug!("Balance fetched: {:?}", balances);
        Ok(balances)
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let product_id = self.product_id(symbol).await?;
        let query = [
            ("product_ids", product_id.to_string()),
            ("states", "open,pending".to_string()),
        ];
        let result = self.request(Method::GET, "/v2/orders", &query, None).await?;
        Ok(as_array(&result)?
            .iter()
            .filter_map(parse_order)
            .filter(|o| o.symbol.is_empty() || o.symbol.contains(symbol))
            .collect())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let result = self
            .request(Method::GET, "/v2/positions/margined", &[], None)
            .await?;
        let positions: Vec<Position> = as_array(&result)?.iter().filter_map(parse_position).collect();
        tracing::debug!("Positions fetched: {}", positions.len());
        Ok(positions)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let path = format!("/v2/tickers/{}", symbol);
        let result = self.request(Method::GET, &path, &[], None).await?;
        ["close", "last_price", "mark_price"]
            .iter()
            .find_map(|key| result.get(*key).and_then(lenient_f64))
            .ok_or_else(|| BotError::InvalidResponse(format!("ticker for {} has no price", symbol)))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let product_id = self.product_id(&request.symbol).await?;
        let mut body = json!({
            "product_id": product_id,
            "product_symbol": request.symbol,
            "size": request.amount.abs().round() as u64,
            "side": request.side.as_str(),
            "order_type": match request.order_type {
                OrderType::Limit => "limit_order",
                OrderType::Market => "market_order",
            },
            "time_in_force": request.time_in_force.as_str(),
        });
        if let Some(price) = request.price {
            body["limit_price"] = Value::String(price.to_string());
        }

        let _guard = self.order_lock.lock().await;
        let result = self.request(Method::POST, "/v2/orders", &[], Some(&body)).await?;
        let order = parse_order(&result)
            .ok_or_else(|| BotError::InvalidResponse(format!("unreadable order: {}", result)))?;
        tracing::debug!("Order created: {:?}", order);
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()> {
        let product_id = self.product_id(symbol).await?;
        let body = json!({ "id": id_value(order_id), "product_id": product_id });

        let _guard = self.order_lock.lock().await;
        self.request(Method::DELETE, "/v2/orders", &[], Some(&body)).await?;
        tracing::debug!("Order canceled: {}", order_id);
        Ok(())
    }

    async fn attach_bracket(
        &self,
        order_id: &str,
        product_id: u64,
        symbol: &str,
        bracket: &Bracket,
    ) -> Result<()> {
        let mut body = serde_json::Map::new();
        body.insert("id".into(), id_value(order_id));
        body.insert("product_id".into(), json!(product_id));
        body.insert("product_symbol".into(), json!(symbol));
        body.extend(bracket.to_params());
        let body = Value::Object(body);

        let _guard = self.order_lock.lock().await;
        self.request(Method::PUT, "/v2/orders/bracket", &[], Some(&body))
            .await?;
        tracing::debug!("Bracket updated on {}: {:?}", order_id, bracket);
        Ok(())
    }
}

fn as_array(result: &Value) -> Result<&Vec<Value>> {
    result
        .as_array()
        .ok_or_else(|| BotError::InvalidResponse(format!("expected array, got {}", result)))
}

/// Numeric ids go back to the exchange as numbers
fn id_value(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| value.get(*key).and_then(lenient_f64))
}

fn nested<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

pub(crate) fn parse_market(value: &Value) -> Option<Market> {
    let id = number_field(value, &["id", "product_id"])? as u64;
    let symbol = string_field(value, &["symbol", "product_symbol"])?;
    Some(Market {
        id,
        symbol,
        contract_value: number_field(value, &["contract_value"]),
    })
}

pub(crate) fn parse_balance(value: &Value) -> Option<Balance> {
    let asset = string_field(value, &["asset_symbol"])
        .or_else(|| string_field(nested(value, "asset"), &["symbol"]))?;
    Some(Balance {
        asset,
        balance: number_field(value, &["balance"]).unwrap_or(0.0),
        available: number_field(value, &["available_balance", "balance"]).unwrap_or(0.0),
    })
}

pub(crate) fn parse_order(value: &Value) -> Option<Order> {
    let id = string_field(value, &["id", "order_id"])?;
    let symbol = string_field(value, &["product_symbol", "symbol"])
        .or_else(|| string_field(nested(value, "product"), &["symbol"]))
        .unwrap_or_default();
    let timestamp = string_field(value, &["created_at"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.timestamp_millis())
        .or_else(|| number_field(value, &["timestamp"]).map(|t| t as i64));

    Some(Order {
        id,
        symbol,
        side: string_field(value, &["side"]).and_then(|s| Side::parse(&s)),
        status: string_field(value, &["state", "status"])
            .map(|s| OrderStatus::parse(&s))
            .unwrap_or(OrderStatus::Unknown),
        amount: number_field(value, &["size", "amount"]).unwrap_or(0.0),
        price: number_field(value, &["limit_price", "price"]),
        timestamp,
    })
}

pub(crate) fn parse_position(value: &Value) -> Option<Position> {
    let product = nested(value, "product");
    let info = nested(value, "info");

    let symbol = string_field(value, &["product_symbol", "symbol"])
        .or_else(|| string_field(product, &["symbol"]))
        .or_else(|| string_field(info, &["product_symbol"]))?;
    let size = number_field(value, &["size", "contracts"])
        .or_else(|| number_field(info, &["size"]))
        .unwrap_or(0.0);
    let entry_price = number_field(value, &["entry_price", "entryPrice"])
        .or_else(|| number_field(info, &["entry_price"]));
    let product_id = number_field(value, &["product_id"])
        .or_else(|| number_field(product, &["id"]))
        .map(|id| id as u64);
    let id = string_field(value, &["id"]).unwrap_or_else(|| symbol.clone());

    Some(Position {
        id,
        symbol,
        size,
        entry_price,
        product_id,
    })
}
