pub mod delta;
pub mod firebase;

pub use delta::DeltaClient;
pub use firebase::FirebaseClient;

use async_trait::async_trait;

use crate::models::{Balance, Bracket, Market, Order, OrderRequest, Position};
use crate::Result;

/// Exchange capabilities consumed by the controller and the trailing monitor
///
/// Implementations return normalized model types; every call may fail and
/// callers decide whether a failure is fatal.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Tradable markets; `reload` bypasses any cache
    async fn load_markets(&self, reload: bool) -> Result<Vec<Market>>;

    async fn fetch_balance(&self) -> Result<Vec<Balance>>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    /// Last traded price
    async fn fetch_ticker(&self, symbol: &str) -> Result<f64>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;

    /// Attach or replace the stop-loss/take-profit on an order or position
    async fn attach_bracket(
        &self,
        order_id: &str,
        product_id: u64,
        symbol: &str,
        bracket: &Bracket,
    ) -> Result<()>;
}
