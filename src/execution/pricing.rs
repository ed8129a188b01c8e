use crate::config::FallbackDeltas;
use crate::models::Side;

/// Entry, stop-loss and take-profit for a new directional order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPrices {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Derives order prices from a signal price and optional zones
#[derive(Debug, Clone)]
pub struct TargetPriceCalculator {
    offset: f64,
    fallback: FallbackDeltas,
}

impl TargetPriceCalculator {
    pub fn new(offset: f64, fallback: FallbackDeltas) -> Self {
        Self { offset, fallback }
    }

    /// Zone pricing needs both zones present and non-zero, otherwise the
    /// fallback deltas apply. A zero price gives zero targets on either path.
    pub fn calculate(
        &self,
        price: f64,
        supply_zone: Option<f64>,
        demand_zone: Option<f64>,
        side: Side,
    ) -> TargetPrices {
        // No price, no targets
        if price == 0.0 {
            return TargetPrices {
                entry: 0.0,
                stop_loss: 0.0,
                take_profit: 0.0,
            };
        }

        let supply = supply_zone.filter(|v| *v != 0.0);
        let demand = demand_zone.filter(|v| *v != 0.0);

        match (supply, demand) {
            (Some(supply), Some(demand)) => self.from_zones(price, supply, demand, side),
            _ => self.from_fallback(price, side),
        }
    }

    fn from_zones(&self, price: f64, supply: f64, demand: f64, side: Side) -> TargetPrices {
        let offset = self.offset;
        match side {
            Side::Sell => TargetPrices {
                entry: price + offset,
                stop_loss: supply + offset,
                take_profit: demand - offset,
            },
            Side::Buy => TargetPrices {
                entry: price - offset,
                stop_loss: demand - offset,
                take_profit: supply + offset,
            },
        }
    }

    fn from_fallback(&self, price: f64, side: Side) -> TargetPrices {
        let deltas = &self.fallback;
        match side {
            Side::Sell => TargetPrices {
                entry: price + deltas.entry,
                stop_loss: price + deltas.short_stop_loss,
                take_profit: price - deltas.short_take_profit,
            },
            Side::Buy => TargetPrices {
                entry: price - deltas.entry,
                stop_loss: price - deltas.long_stop_loss,
                take_profit: price + deltas.long_take_profit,
            },
        }
    }
}
