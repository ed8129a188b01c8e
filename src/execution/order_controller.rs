use std::sync::Arc;

use crate::api::ExchangeGateway;
use crate::config::TradingSettings;
use crate::execution::price_feed::PriceFeed;
use crate::execution::pricing::{TargetPriceCalculator, TargetPrices};
use crate::execution::{PositionTracker, TradeManager};
use crate::models::{Bracket, OrderRequest, OrderStatus, Side, Signal, SignalKind};

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    /// Positions flattened by market orders
    Closed { count: usize },
    /// Limit entry placed
    Placed {
        order_id: String,
        prices: TargetPrices,
        bracket_attached: bool,
    },
    Skip,
}

#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    pub action: LifecycleAction,
    pub reason: String,
}

impl LifecycleOutcome {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: LifecycleAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Turns classified signals into exchange actions
///
/// Every step is independently failable: a failure is logged and ends the
/// flow, side effects of earlier steps stay in place.
pub struct OrderController {
    gateway: Arc<dyn ExchangeGateway>,
    trades: TradeManager,
    tracker: PositionTracker,
    price_feed: PriceFeed,
    calculator: TargetPriceCalculator,
    settings: TradingSettings,
}

impl OrderController {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        trades: TradeManager,
        price_feed: PriceFeed,
        settings: TradingSettings,
    ) -> Self {
        let tracker = PositionTracker::new(gateway.clone(), settings.symbol.clone());
        let calculator = TargetPriceCalculator::new(settings.fixed_offset, settings.fallback.clone());
        Self {
            gateway,
            trades,
            tracker,
            price_feed,
            calculator,
            settings,
        }
    }

    pub async fn handle(&self, signal: &Signal) -> LifecycleOutcome {
        match signal.kind() {
            SignalKind::TakeProfit => {
                tracing::info!("Processing take profit signal");
                let count = self.close_positions().await;
                LifecycleOutcome {
                    action: LifecycleAction::Closed { count },
                    reason: "Take profit signal".to_string(),
                }
            }
            SignalKind::Long => self.open(signal, Side::Buy).await,
            SignalKind::Short => self.open(signal, Side::Sell).await,
            SignalKind::Invalid => {
                tracing::warn!("Invalid signal: {}", signal.text);
                LifecycleOutcome::skip("Unrecognised signal text")
            }
        }
    }

    /// Market-close every valid position, returns how many closes succeeded
    pub async fn close_positions(&self) -> usize {
        let symbol = &self.settings.symbol;
        let mut closed = 0;

        for position in self.tracker.get_valid_positions().await {
            let Some(direction) = position.direction() else {
                continue;
            };
            let side = direction.closing_side();
            let qty = position.size.abs();
            tracing::info!("Closing {} position of size {}", side, qty);

            match self.trades.place_market_order(symbol, side, qty).await {
                Ok(_) => closed += 1,
                Err(e) => tracing::error!("Position closing error for {}: {}", position.id, e),
            }
        }

        closed
    }

    async fn open(&self, signal: &Signal, side: Side) -> LifecycleOutcome {
        let symbol = &self.settings.symbol;

        // Every directional signal is a full reversal
        self.close_positions().await;

        self.cancel_conflicting_orders(side).await;
        self.cancel_same_side_orders(side).await;
        tokio::time::sleep(self.settings.settle_delay()).await;

        if self.pending_order_exists(side).await {
            tracing::info!("Existing {} order present", side);
            return LifecycleOutcome::skip(format!("{} order still open after cancel", side));
        }

        let raw_price = match signal.price {
            Some(price) => price,
            None => {
                tracing::warn!("Invalid or missing price. Using fallback from price feed.");
                self.price_feed.latest().unwrap_or(0.0)
            }
        };

        let prices =
            self.calculator
                .calculate(raw_price, signal.supply_zone, signal.demand_zone, side);
        if prices.entry <= 0.0 {
            tracing::error!("No usable entry price for {} signal, not placing", side);
            return LifecycleOutcome::skip("No usable entry price");
        }

        let request = OrderRequest::limit(symbol, side, self.settings.order_size, prices.entry);
        let order = match self.gateway.create_order(&request).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("Limit order failed: {}", e);
                return LifecycleOutcome::skip(format!("Limit order failed: {}", e));
            }
        };
        tracing::info!(
            order_id = %order.id,
            entry = prices.entry,
            stop_loss = prices.stop_loss,
            take_profit = prices.take_profit,
            "Limit {} order placed",
            side
        );

        let bracket = Bracket::new(prices.stop_loss, prices.take_profit, self.settings.trigger_method);
        let bracket_attached = match self
            .gateway
            .attach_bracket(&order.id, self.settings.product_id, symbol, &bracket)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Bracket attachment failed for {}: {}", order.id, e);
                false
            }
        };

        LifecycleOutcome {
            action: LifecycleAction::Placed {
                order_id: order.id,
                prices,
                bracket_attached,
            },
            reason: format!("{} signal", side),
        }
    }

    /// Cancel open orders on the other side (or with no known side)
    async fn cancel_conflicting_orders(&self, side: Side) {
        let symbol = &self.settings.symbol;
        match self.gateway.fetch_open_orders(symbol).await {
            Ok(orders) => {
                for order in orders
                    .iter()
                    .filter(|o| o.status == OrderStatus::Open && o.side != Some(side))
                {
                    self.cancel_order(&order.id).await;
                }
            }
            Err(e) => tracing::error!("Error canceling conflicting orders: {}", e),
        }
    }

    async fn cancel_same_side_orders(&self, side: Side) {
        let symbol = &self.settings.symbol;
        match self.gateway.fetch_open_orders(symbol).await {
            Ok(orders) => {
                for order in orders.iter().filter(|o| o.side == Some(side)) {
                    self.cancel_order(&order.id).await;
                }
            }
            Err(e) => tracing::error!("Error canceling same-side orders: {}", e),
        }
    }

    async fn cancel_order(&self, order_id: &str) {
        match self.gateway.cancel_order(order_id, &self.settings.symbol).await {
            Ok(()) => tracing::info!("Canceled order: {}", order_id),
            Err(e) => tracing::error!("Error canceling order {}: {}", order_id, e),
        }
    }

    async fn pending_order_exists(&self, side: Side) -> bool {
        match self.gateway.fetch_open_orders(&self.settings.symbol).await {
            Ok(orders) => orders
                .iter()
                .any(|o| o.side == Some(side) && o.status == OrderStatus::Open),
            Err(e) => {
                tracing::error!("Error checking pending orders: {}", e);
                false
            }
        }
    }
}
