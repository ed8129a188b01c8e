//! In-memory gateway and sink used by unit tests
use async_trait::async_trait;
use std::sync::Mutex;

use crate::api::ExchangeGateway;
use crate::error::BotError;
use crate::models::{
    Balance, Bracket, Market, Order, OrderRecord, OrderRequest, OrderStatus, Position, Side,
};
use crate::persistence::OrderSink;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    FetchOpenOrders,
    FetchPositions,
    FetchTicker,
    CreateOrder(OrderRequest),
    CancelOrder(String),
    AttachBracket { order_id: String, bracket: Bracket },
}

#[derive(Default)]
struct FakeState {
    positions: Vec<Position>,
    orders: Vec<Order>,
    ticker: f64,
    calls: Vec<GatewayCall>,
    next_id: u64,
    fail_positions: bool,
    fail_create: bool,
    /// Orders that survive cancellation (exchange lag)
    sticky_orders: Vec<String>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

fn fake_failure(what: &str) -> BotError {
    BotError::Exchange {
        status: 500,
        message: format!("{} unavailable", what),
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(self, positions: Vec<Position>) -> Self {
        self.state.lock().unwrap().positions = positions;
        self
    }

    pub fn with_orders(self, orders: Vec<Order>) -> Self {
        self.state.lock().unwrap().orders = orders;
        self
    }

    pub fn failing_positions(self) -> Self {
        self.state.lock().unwrap().fail_positions = true;
        self
    }

    pub fn failing_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    pub fn sticky(self, order_id: &str) -> Self {
        self.state.lock().unwrap().sticky_orders.push(order_id.to_string());
        self
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().unwrap().positions = positions;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created_orders(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::CreateOrder(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::CancelOrder(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn brackets(&self) -> Vec<(String, Bracket)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::AttachBracket { order_id, bracket } => Some((order_id, bracket)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn load_markets(&self, _reload: bool) -> Result<Vec<Market>> {
        Ok(vec![Market {
            id: 27,
            symbol: "BTCUSD".to_string(),
            contract_value: Some(0.001),
        }])
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>> {
        Ok(vec![Balance {
            asset: "USD".to_string(),
            balance: 1000.0,
            available: 1000.0,
        }])
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::FetchOpenOrders);
        Ok(state
            .orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::FetchPositions);
        if state.fail_positions {
            return Err(fake_failure("positions"));
        }
        Ok(state.positions.clone())
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<f64> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::FetchTicker);
        Ok(state.ticker)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::CreateOrder(request.clone()));
        if state.fail_create {
            return Err(fake_failure("orders"));
        }
        state.next_id += 1;
        Ok(Order {
            id: format!("fake-{}", state.next_id),
            symbol: request.symbol.clone(),
            side: Some(request.side),
            status: OrderStatus::Open,
            amount: request.amount,
            price: request.price,
            timestamp: Some(1_700_000_000_000),
        })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::CancelOrder(order_id.to_string()));
        if !state.sticky_orders.iter().any(|id| id == order_id) {
            state.orders.retain(|o| o.id != order_id);
        }
        Ok(())
    }

    async fn attach_bracket(
        &self,
        order_id: &str,
        _product_id: u64,
        _symbol: &str,
        bracket: &Bracket,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::AttachBracket {
            order_id: order_id.to_string(),
            bracket: bracket.clone(),
        });
        Ok(())
    }
}

/// Sink that keeps records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, OrderRecord)>>,
    fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<(String, OrderRecord)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSink for MemorySink {
    async fn store_order(&self, account: &str, record: &OrderRecord) -> Result<()> {
        if self.fail {
            return Err(fake_failure("sink"));
        }
        self.records
            .lock()
            .unwrap()
            .push((account.to_string(), record.clone()));
        Ok(())
    }
}

/// Sink whose writes never complete
pub struct StalledSink;

#[async_trait]
impl OrderSink for StalledSink {
    async fn store_order(&self, _account: &str, _record: &OrderRecord) -> Result<()> {
        std::future::pending().await
    }
}

pub fn position(id: &str, symbol: &str, size: f64, entry: Option<f64>) -> Position {
    Position {
        id: id.to_string(),
        symbol: symbol.to_string(),
        size,
        entry_price: entry,
        product_id: Some(27),
    }
}

pub fn open_order(id: &str, side: Side, status: OrderStatus) -> Order {
    Order {
        id: id.to_string(),
        symbol: "BTCUSD".to_string(),
        side: Some(side),
        status,
        amount: 1.0,
        price: Some(50000.0),
        timestamp: None,
    }
}
