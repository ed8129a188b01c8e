use std::sync::Arc;

use crate::api::ExchangeGateway;
use crate::models::Position;

/// Filters exchange positions down to the managed instrument
#[derive(Clone)]
pub struct PositionTracker {
    gateway: Arc<dyn ExchangeGateway>,
    instrument: String,
}

impl PositionTracker {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, instrument: impl Into<String>) -> Self {
        Self {
            gateway,
            instrument: instrument.into(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Non-flat positions whose symbol contains the instrument
    ///
    /// A failed query is logged and reported as no positions.
    pub async fn get_valid_positions(&self) -> Vec<Position> {
        match self.gateway.fetch_positions().await {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.size != 0.0 && p.symbol.contains(&self.instrument))
                .collect(),
            Err(e) => {
                tracing::error!("Error fetching positions: {}", e);
                Vec::new()
            }
        }
    }
}
