use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BotError;

/// Direction of a trade signal, also the side of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Case-insensitive parse of exchange side strings
    pub fn parse(raw: &str) -> Option<Side> {
        match raw.trim().to_lowercase().as_str() {
            "buy" | "long" => Some(Side::Buy),
            "sell" | "short" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a position profits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Positive size is long, negative is short, zero has no direction
    pub fn from_size(size: f64) -> Option<Direction> {
        if size > 0.0 {
            Some(Direction::Long)
        } else if size < 0.0 {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// Side of the order that flattens a position in this direction
    pub fn closing_side(&self) -> Side {
        match self {
            Direction::Long => Side::Sell,
            Direction::Short => Side::Buy,
        }
    }
}

/// Classified meaning of a signal's text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    TakeProfit,
    Long,
    Short,
    Invalid,
}

impl SignalKind {
    /// Lower-cased substring match; take-profit wins over direction words
    pub fn classify(text: &str) -> SignalKind {
        let text = text.to_lowercase();
        if text.contains("tp") || text.contains("take profit") {
            SignalKind::TakeProfit
        } else if text.contains("buy") {
            SignalKind::Long
        } else if text.contains("short") {
            SignalKind::Short
        } else {
            SignalKind::Invalid
        }
    }

    /// Order side for directional signals
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalKind::Long => Some(Side::Buy),
            SignalKind::Short => Some(Side::Sell),
            SignalKind::TakeProfit | SignalKind::Invalid => None,
        }
    }
}

/// Trade signal as published by the upstream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub text: String,
    pub price: Option<f64>,
    pub supply_zone: Option<f64>,
    pub demand_zone: Option<f64>,
}

impl Signal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            price: None,
            supply_zone: None,
            demand_zone: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_zones(mut self, supply_min: f64, demand_min: f64) -> Self {
        self.supply_zone = Some(supply_min);
        self.demand_zone = Some(demand_min);
        self
    }

    /// Build a signal from a raw payload
    ///
    /// Accepts the text/price either at the top level or nested under
    /// `last_signal`. Prices and zone minimums may be numbers or numeric
    /// strings; anything unparseable becomes `None`. Only a missing `text`
    /// is an error.
    pub fn from_payload(payload: &Value) -> Result<Signal, BotError> {
        let body = payload
            .get("last_signal")
            .filter(|v| v.is_object())
            .unwrap_or(payload);

        let text = body
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::InvalidSignal("missing text".to_string()))?
            .to_string();

        let zone_min = |name: &str| {
            payload
                .get(name)
                .or_else(|| body.get(name))
                .and_then(|zone| zone.get("min"))
                .and_then(lenient_f64)
        };

        Ok(Signal {
            text,
            price: body.get("price").and_then(lenient_f64),
            supply_zone: zone_min("supply_zone"),
            demand_zone: zone_min("demand_zone"),
        })
    }

    pub fn kind(&self) -> SignalKind {
        SignalKind::classify(&self.text)
    }
}

/// Change notification delivered by the signal subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub event: String,
    pub path: String,
    pub data: Value,
}

impl SignalEvent {
    /// Only `put` and `patch` carry signal data
    pub fn is_actionable(&self) -> bool {
        matches!(self.event.as_str(), "put" | "patch")
    }
}

/// Open position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub size: f64, // Positive = long, negative = short
    pub entry_price: Option<f64>,
    pub product_id: Option<u64>,
}

impl Position {
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_size(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Pending,
    Closed,
    Cancelled,
    Unknown,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> OrderStatus {
        match raw.trim().to_lowercase().as_str() {
            "open" => OrderStatus::Open,
            "pending" => OrderStatus::Pending,
            "closed" | "filled" => OrderStatus::Closed,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Pending => "pending",
            OrderStatus::Closed => "closed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Unknown => "unknown",
        }
    }
}

/// Order as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Option<Side>,
    pub status: OrderStatus,
    pub amount: f64,
    pub price: Option<f64>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
        }
    }
}

/// Order placement request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub amount: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: Side, amount: f64, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            side,
            amount,
            price: Some(price),
            time_in_force: TimeInForce::Gtc,
        }
    }

    pub fn market(symbol: &str, side: Side, amount: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
            time_in_force: TimeInForce::Ioc,
        }
    }

    /// Extra parameters recorded alongside the order
    pub fn params(&self) -> Value {
        serde_json::json!({ "time_in_force": self.time_in_force.as_str() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMethod {
    #[default]
    LastTradedPrice,
    MarkPrice,
    SpotPrice,
}

impl TriggerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMethod::LastTradedPrice => "last_traded_price",
            TriggerMethod::MarkPrice => "mark_price",
            TriggerMethod::SpotPrice => "spot_price",
        }
    }
}

/// Attached stop-loss / take-profit payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub stop_loss_price: f64,
    pub take_profit_price: Option<f64>,
    pub trigger_method: TriggerMethod,
}

impl Bracket {
    pub fn new(stop_loss_price: f64, take_profit_price: f64, trigger_method: TriggerMethod) -> Self {
        Self {
            stop_loss_price,
            take_profit_price: Some(take_profit_price),
            trigger_method,
        }
    }

    /// Stop-loss only update, leaves take-profit untouched
    pub fn stop_only(stop_loss_price: f64, trigger_method: TriggerMethod) -> Self {
        Self {
            stop_loss_price,
            take_profit_price: None,
            trigger_method,
        }
    }

    /// Exchange request fields; prices are sent as strings
    pub fn to_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        let stop = self.stop_loss_price.to_string();
        params.insert("bracket_stop_loss_limit_price".into(), Value::String(stop.clone()));
        params.insert("bracket_stop_loss_price".into(), Value::String(stop));
        if let Some(tp) = self.take_profit_price {
            let tp = tp.to_string();
            params.insert("bracket_take_profit_limit_price".into(), Value::String(tp.clone()));
            params.insert("bracket_take_profit_price".into(), Value::String(tp));
        }
        params.insert(
            "bracket_stop_trigger_method".into(),
            Value::String(self.trigger_method.as_str().to_string()),
        );
        params
    }
}

/// Persisted copy of a placed market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: f64,
    pub params: Value,
    pub status: String,
    pub timestamp: i64, // Milliseconds since epoch
}

/// Tradable instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: u64,
    pub symbol: String,
    pub contract_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub balance: f64,
    pub available: f64,
}

/// Read a number that may be encoded as a JSON number or a numeric string
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
