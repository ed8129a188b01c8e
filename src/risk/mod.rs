// Profit and trailing-stop rules
pub mod profit;
pub mod trailing;

pub use profit::{calculate_profit, position_profit, Profit};
pub use trailing::{
    ratchet, should_trigger, StopBook, StopCandidate, StopMethod, TrailingAction,
    TrailingDecision, TrailingEngine, TrailingRules, TrailingTier,
};
