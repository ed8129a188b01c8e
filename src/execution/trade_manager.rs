use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ExchangeGateway;
use crate::models::{Order, OrderRecord, OrderRequest, OrderStatus, Side};
use crate::persistence::OrderSink;
use crate::Result;

/// Places market orders and records them for the account
#[derive(Clone)]
pub struct TradeManager {
    gateway: Arc<dyn ExchangeGateway>,
    sink: Arc<dyn OrderSink>,
    account: String,
    sink_timeout: Duration,
}

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

impl TradeManager {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        sink: Arc<dyn OrderSink>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            sink,
            account: account.into(),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }

    /// Upper bound on recording one order through the sink
    pub fn with_sink_timeout(mut self, sink_timeout: Duration) -> Self {
        self.sink_timeout = sink_timeout;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Immediate-or-cancel market order
    ///
    /// The placed order is stored through the sink; a storage failure is
    /// logged and does not fail the placement.
    pub async fn place_market_order(&self, symbol: &str, side: Side, amount: f64) -> Result<Order> {
        let request = OrderRequest::market(symbol, side, amount);
        let order = self.gateway.create_order(&request).await.map_err(|e| {
            tracing::error!("Error placing market order: {}", e);
            e
        })?;

        tracing::info!(
            "Market {} order placed: {} {} (id {})",
            side,
            amount,
            symbol,
            order.id
        );

        let record = self.build_record(&request, &order);
        match tokio::time::timeout(self.sink_timeout, self.sink.store_order(&self.account, &record))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Error storing order {} for {}: {}", record.id, self.account, e)
            }
            Err(_) => tracing::error!(
                "Error storing order {} for {}: no answer after {:?}",
                record.id,
                self.account,
                self.sink_timeout
            ),
        }

        Ok(order)
    }

    fn build_record(&self, request: &OrderRequest, order: &Order) -> OrderRecord {
        let id = if order.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            order.id.clone()
        };
        let status = match order.status {
            OrderStatus::Unknown => OrderStatus::Open,
            ref other => other.clone(),
        };

        OrderRecord {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            params: request.params(),
            status: status.as_str().to_string(),
            timestamp: order
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        }
    }
}
