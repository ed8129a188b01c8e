use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

use crate::api::ExchangeGateway;
use crate::config::{TradingSettings, TrailingSettings};
use crate::execution::{PositionTracker, PriceFeed, TradeManager};
use crate::models::{Bracket, Position};
use crate::risk::{position_profit, StopBook, TrailingAction, TrailingDecision, TrailingEngine};

/// What one tick did to a single position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub position_id: String,
    pub profit_pct: f64,
    pub decision: TrailingDecision,
}

/// Background loop applying the trailing rules to every open position
pub struct TrailingMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    tracker: PositionTracker,
    trades: TradeManager,
    price_feed: PriceFeed,
    engine: TrailingEngine,
    book: StopBook,
    settings: TrailingSettings,
    trading: TradingSettings,
}

impl TrailingMonitor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        trades: TradeManager,
        price_feed: PriceFeed,
        settings: TrailingSettings,
        trading: TradingSettings,
    ) -> Self {
        let tracker = PositionTracker::new(gateway.clone(), trading.symbol.clone());
        let engine = TrailingEngine::new(settings.rules.clone())
            .with_bracket_push_on_all_tiers(settings.push_bracket_on_all_tiers);
        let book = StopBook::new(Duration::from_secs(settings.stop_ttl_secs));

        Self {
            gateway,
            tracker,
            trades,
            price_feed,
            engine,
            book,
            settings,
            trading,
        }
    }

    pub fn stop_for(&self, position_id: &str) -> Option<f64> {
        self.book.get(position_id)
    }

    /// Wait for a first price, then tick forever
    pub async fn run(mut self) {
        let ready = self
            .price_feed
            .wait_until_ready(
                Duration::from_secs(self.settings.startup_timeout_secs),
                Duration::from_secs(self.settings.startup_poll_secs.max(1)),
            )
            .await;
        if !ready {
            tracing::warn!("Starting trailing monitor without a price");
        }

        tracing::info!(
            "Trailing monitor running every {}s",
            self.settings.check_interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.settings.check_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick(Instant::now()).await;
        }
    }

    /// One pass over all valid positions
    pub async fn tick(&mut self, now: Instant) -> Vec<PositionReport> {
        let expired = self.book.evict_expired(now);
        if expired > 0 {
            tracing::debug!("Evicted {} idle trailing stops", expired);
        }

        let Some(live_price) = self.price_feed.latest() else {
            tracing::debug!("Price unavailable, skipping trailing check");
            return Vec::new();
        };

        let positions = self.tracker.get_valid_positions().await;
        let closed = self.book.retain_open(positions.iter().map(|p| p.id.as_str()));
        if closed > 0 {
            tracing::debug!("Dropped {} trailing stops for closed positions", closed);
        }

        if positions.is_empty() {
            tracing::info!("No open positions");
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(positions.len());
        for position in &positions {
            if let Some(report) = self.check_position(position, live_price, now).await {
                reports.push(report);
            }
        }
        reports
    }

    async fn check_position(
        &mut self,
        position: &Position,
        live_price: f64,
        now: Instant,
    ) -> Option<PositionReport> {
        let (Some(direction), Some(entry)) = (position.direction(), position.entry_price) else {
            tracing::warn!("Position {} has no entry price, skipping", position.id);
            return None;
        };
        let Some(profit) = position_profit(position, live_price) else {
            tracing::warn!("Profit unavailable for position {}", position.id);
            return None;
        };

        let decision = self.engine.evaluate(
            &mut self.book,
            &position.id,
            entry,
            direction,
            profit.percentage,
            live_price,
            now,
        );

        let usd = profit.in_currency(self.settings.contract_value, 1.0);
        let inr = profit.in_currency(self.settings.contract_value, self.settings.usd_inr_rate);
        tracing::info!(
            "Position {} | size {} | entry {:.2} | live {:.2} | profit {:.2}% | ${:.2} | ₹{:.2} | stop {:.2}",
            position.id,
            position.size,
            entry,
            live_price,
            profit.percentage * 100.0,
            usd,
            inr,
            decision.stop
        );

        match decision.action {
            TrailingAction::Close => {
                tracing::info!(
                    "Trailing stop hit for {}: live {:.2} crossed {:.2}, closing",
                    position.id,
                    live_price,
                    decision.stop
                );
                let side = direction.closing_side();
                if let Err(e) = self
                    .trades
                    .place_market_order(&self.trading.symbol, side, position.size.abs())
                    .await
                {
                    if e.is_transient() {
                        tracing::warn!("Failed to close position {} (transient): {}", position.id, e);
                    } else {
                        tracing::error!("Failed to close position {}: {}", position.id, e);
                    }
                }
            }
            TrailingAction::UpdateBracket => {
                let bracket = Bracket::stop_only(decision.stop, self.trading.trigger_method);
                let product_id = position.product_id.unwrap_or(self.trading.product_id);
                match self
                    .gateway
                    .attach_bracket(&position.id, product_id, &self.trading.symbol, &bracket)
                    .await
                {
                    Ok(()) => tracing::info!(
                        "Bracket stop for {} moved to {:.2}",
                        position.id,
                        decision.stop
                    ),
                    Err(e) if e.is_transient() => {
                        tracing::warn!("Bracket update failed for {} (transient): {}", position.id, e)
                    }
                    Err(e) => {
                        tracing::error!("Bracket update failed for {}: {}", position.id, e)
                    }
                }
            }
            TrailingAction::Hold => {}
        }

        Some(PositionReport {
            position_id: position.id.clone(),
            profit_pct: profit.percentage,
            decision,
        })
    }
}
