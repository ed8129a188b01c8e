use crate::models::{Direction, Position};

/// Unrealized profit of a position at a given price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profit {
    /// Fractional return on entry (0.01 = 1%)
    pub percentage: f64,
    /// Price difference times position size, in quote units per contract unit
    pub absolute: f64,
}

impl Profit {
    /// Absolute profit converted with a contract value and an FX rate
    pub fn in_currency(&self, contract_value: f64, rate: f64) -> f64 {
        self.absolute * contract_value * rate
    }
}

/// Direction-aware profit of `size` contracts entered at `entry`
///
/// Returns `None` when the entry price is missing or non-positive, or when
/// the size is zero.
pub fn calculate_profit(entry: Option<f64>, size: f64, live_price: f64) -> Option<Profit> {
    let entry = entry.filter(|e| e.is_finite() && *e > 0.0)?;
    let direction = Direction::from_size(size)?;

    let (percentage, absolute) = match direction {
        Direction::Long => ((live_price - entry) / entry, (live_price - entry) * size),
        Direction::Short => ((entry - live_price) / entry, (entry - live_price) * size.abs()),
    };

    Some(Profit {
        percentage,
        absolute,
    })
}

/// Profit for an exchange-reported position
pub fn position_profit(position: &Position, live_price: f64) -> Option<Profit> {
    calculate_profit(position.entry_price, position.size, live_price)
}
