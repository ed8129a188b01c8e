use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::error::BotError;
use crate::models::Direction;

/// One row of the trailing table
///
/// A tier with an offset is "dynamic": the stop sits a fixed fraction beyond
/// entry. A tier without one is "partial booking": the stop locks in
/// `book_fraction` of the current profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingTier {
    pub min_profit_pct: f64,
    #[serde(default)]
    pub trailing_stop_offset: Option<f64>,
    #[serde(default)]
    pub book_fraction: Option<f64>,
}

impl TrailingTier {
    pub fn dynamic(min_profit_pct: f64, offset: f64) -> Self {
        Self {
            min_profit_pct,
            trailing_stop_offset: Some(offset),
            book_fraction: None,
        }
    }

    pub fn booking(min_profit_pct: f64, fraction: f64) -> Self {
        Self {
            min_profit_pct,
            trailing_stop_offset: None,
            book_fraction: Some(fraction),
        }
    }

    /// Booking tiers push their stop to the exchange bracket
    pub fn is_booking(&self) -> bool {
        self.book_fraction.is_some()
    }
}

/// Tiered trailing-stop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingRules {
    pub start_trailing_profit_pct: f64,
    pub fixed_stop_loss_pct: f64,
    pub levels: Vec<TrailingTier>,
}

impl Default for TrailingRules {
    fn default() -> Self {
        Self {
            start_trailing_profit_pct: 0.005,
            fixed_stop_loss_pct: 0.005,
            levels: vec![
                TrailingTier::dynamic(0.005, 0.001),
                TrailingTier::dynamic(0.01, 0.006),
                TrailingTier::dynamic(0.015, 0.012),
                TrailingTier::booking(0.02, 0.9),
            ],
        }
    }
}

/// How a candidate stop was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMethod {
    Fixed,
    Dynamic,
    Booking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopCandidate {
    pub price: f64,
    pub method: StopMethod,
    pub tier: Option<TrailingTier>,
}

impl TrailingRules {
    pub fn validate(&self) -> Result<(), BotError> {
        let invalid = |msg: String| Err(BotError::Config(config::ConfigError::Message(msg)));

        if !self.start_trailing_profit_pct.is_finite() {
            return invalid("start_trailing_profit_pct must be finite".to_string());
        }
        if !(0.0..1.0).contains(&self.fixed_stop_loss_pct) {
            return invalid(format!(
                "fixed_stop_loss_pct must be in [0, 1), got {}",
                self.fixed_stop_loss_pct
            ));
        }
        for tier in &self.levels {
            if !tier.min_profit_pct.is_finite() {
                return invalid("tier min_profit_pct must be finite".to_string());
            }
            if let Some(fraction) = tier.book_fraction {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return invalid(format!(
                        "book_fraction must be in (0, 1], got {} at tier {}",
                        fraction, tier.min_profit_pct
                    ));
                }
            }
        }
        Ok(())
    }

    /// Highest tier whose threshold does not exceed `profit_pct`
    ///
    /// Nothing applies below `start_trailing_profit_pct`. Table order does
    /// not matter.
    pub fn select_tier(&self, profit_pct: f64) -> Option<&TrailingTier> {
        if profit_pct < self.start_trailing_profit_pct {
            return None;
        }
        self.levels
            .iter()
            .filter(|tier| tier.min_profit_pct <= profit_pct)
            .max_by(|a, b| a.min_profit_pct.total_cmp(&b.min_profit_pct))
    }

    /// Stop placed `fixed_stop_loss_pct` against the position
    pub fn fixed_stop(&self, entry: f64, direction: Direction) -> f64 {
        match direction {
            Direction::Long => entry * (1.0 - self.fixed_stop_loss_pct),
            Direction::Short => entry * (1.0 + self.fixed_stop_loss_pct),
        }
    }

    pub fn candidate_stop(&self, entry: f64, direction: Direction, profit_pct: f64) -> StopCandidate {
        let Some(tier) = self.select_tier(profit_pct) else {
            return StopCandidate {
                price: self.fixed_stop(entry, direction),
                method: StopMethod::Fixed,
                tier: None,
            };
        };

        let (shift, method) = match tier.trailing_stop_offset {
            Some(offset) => (offset, StopMethod::Dynamic),
            None => (
                profit_pct * tier.book_fraction.unwrap_or(1.0),
                StopMethod::Booking,
            ),
        };

        let price = match direction {
            Direction::Long => entry * (1.0 + shift),
            Direction::Short => entry * (1.0 - shift),
        };

        StopCandidate {
            price,
            method,
            tier: Some(tier.clone()),
        }
    }
}

/// Combine a candidate with the stored stop; never moves against the position
pub fn ratchet(previous: Option<f64>, candidate: f64, direction: Direction) -> f64 {
    match (previous, direction) {
        (None, _) => candidate,
        (Some(prev), Direction::Long) => prev.max(candidate),
        (Some(prev), Direction::Short) => prev.min(candidate),
    }
}

/// Strict crossing; touching the stop does not fire
pub fn should_trigger(direction: Direction, live_price: f64, stop: f64) -> bool {
    match direction {
        Direction::Long => live_price < stop,
        Direction::Short => live_price > stop,
    }
}

#[derive(Debug, Clone, Copy)]
struct StopEntry {
    stop: f64,
    direction: Direction,
    updated_at: Instant,
}

/// Ratcheted stop per position id
///
/// Entries are dropped when their position closes, when a trigger fires, or
/// after sitting untouched for longer than the TTL.
#[derive(Debug)]
pub struct StopBook {
    entries: HashMap<String, StopEntry>,
    ttl: Duration,
}

impl StopBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, position_id: &str) -> Option<f64> {
        self.entries.get(position_id).map(|e| e.stop)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ratchet the stored stop toward `candidate` and return the result
    pub fn ratchet(
        &mut self,
        position_id: &str,
        direction: Direction,
        candidate: f64,
        now: Instant,
    ) -> f64 {
        // A position that flipped sides under the same id starts over
        let previous = self
            .entries
            .get(position_id)
            .filter(|e| e.direction == direction)
            .map(|e| e.stop);

        let stop = ratchet(previous, candidate, direction);
        self.entries.insert(
            position_id.to_string(),
            StopEntry {
                stop,
                direction,
                updated_at: now,
            },
        );
        stop
    }

    pub fn remove(&mut self, position_id: &str) -> Option<f64> {
        self.entries.remove(position_id).map(|e| e.stop)
    }

    /// Drop entries for positions no longer reported open
    pub fn retain_open<'a>(&mut self, open_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let open: HashSet<&str> = open_ids.into_iter().collect();
        let before = self.entries.len();
        self.entries.retain(|id, _| open.contains(id.as_str()));
        before - self.entries.len()
    }

    /// Drop entries untouched for longer than the TTL
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.updated_at) <= ttl);
        before - self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingAction {
    /// Live price crossed the stop: flatten the position
    Close,
    /// Push the ratcheted stop to the exchange bracket
    UpdateBracket,
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrailingDecision {
    pub candidate: StopCandidate,
    pub stop: f64,
    pub action: TrailingAction,
}

/// Applies the rule table to one position per call
#[derive(Debug, Clone)]
pub struct TrailingEngine {
    rules: TrailingRules,
    push_bracket_on_all_tiers: bool,
}

impl TrailingEngine {
    pub fn new(rules: TrailingRules) -> Self {
        Self {
            rules,
            push_bracket_on_all_tiers: false,
        }
    }

    /// Also push bracket updates for dynamic tiers, not only booking tiers
    pub fn with_bracket_push_on_all_tiers(mut self, enabled: bool) -> Self {
        self.push_bracket_on_all_tiers = enabled;
        self
    }

    pub fn rules(&self) -> &TrailingRules {
        &self.rules
    }

    pub fn evaluate(
        &self,
        book: &mut StopBook,
        position_id: &str,
        entry: f64,
        direction: Direction,
        profit_pct: f64,
        live_price: f64,
        now: Instant,
    ) -> TrailingDecision {
        let candidate = self.rules.candidate_stop(entry, direction, profit_pct);
        let stop = book.ratchet(position_id, direction, candidate.price, now);

        let action = if should_trigger(direction, live_price, stop) {
            book.remove(position_id);
            TrailingAction::Close
        } else {
            match &candidate.tier {
                Some(tier) if tier.is_booking() => TrailingAction::UpdateBracket,
                Some(_) if self.push_bracket_on_all_tiers => TrailingAction::UpdateBracket,
                _ => TrailingAction::Hold,
            }
        };

        TrailingDecision {
            candidate,
            stop,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn pct(entry: f64, live: f64) -> f64 {
        (live - entry) / entry
    }

    #[test]
    fn test_fixed_stop_below_start_threshold() {
        let rules = TrailingRules::default();

        for profit in [-0.05, 0.0, 0.001, 0.0049] {
            let long = rules.candidate_stop(100.0, Direction::Long, profit);
            assert_eq!(long.method, StopMethod::Fixed);
            assert!(approx(long.price, 99.5));

            let short = rules.candidate_stop(100.0, Direction::Short, profit);
            assert!(approx(short.price, 100.5));
        }
    }

    #[test]
    fn test_select_greatest_lower_bound_regardless_of_order() {
        let rules = TrailingRules {
            start_trailing_profit_pct: 0.0,
            fixed_stop_loss_pct: 0.005,
            levels: vec![
                TrailingTier::booking(0.02, 0.9),
                TrailingTier::dynamic(0.005, 0.001),
                TrailingTier::dynamic(0.015, 0.012),
                TrailingTier::dynamic(0.01, 0.006),
            ],
        };

        assert_eq!(rules.select_tier(0.004), None);
        assert_eq!(rules.select_tier(0.005).unwrap().min_profit_pct, 0.005);
        assert_eq!(rules.select_tier(0.012).unwrap().min_profit_pct, 0.01);
        assert_eq!(rules.select_tier(0.019).unwrap().min_profit_pct, 0.015);
        assert_eq!(rules.select_tier(0.5).unwrap().min_profit_pct, 0.02);
    }

    #[test]
    fn test_no_tier_before_start_even_if_threshold_lower() {
        let rules = TrailingRules {
            start_trailing_profit_pct: 0.01,
            fixed_stop_loss_pct: 0.005,
            levels: vec![TrailingTier::dynamic(0.002, 0.001)],
        };
        assert!(rules.select_tier(0.005).is_none());
        assert!(rules.select_tier(0.01).is_some());
    }

    #[test]
    fn test_dynamic_tiers_long() {
        let rules = TrailingRules::default();

        let first = rules.candidate_stop(100.0, Direction::Long, pct(100.0, 100.6));
        assert_eq!(first.method, StopMethod::Dynamic);
        assert_eq!(first.tier.as_ref().unwrap().min_profit_pct, 0.005);
        assert!(approx(first.price, 100.1));

        let second = rules.candidate_stop(100.0, Direction::Long, pct(100.0, 101.6));
        assert_eq!(second.tier.as_ref().unwrap().min_profit_pct, 0.015);
        assert!(approx(second.price, 101.2));
    }

    #[test]
    fn test_booking_tier_long_and_short() {
        let rules = TrailingRules::default();

        let long = rules.candidate_stop(100.0, Direction::Long, 0.025);
        assert_eq!(long.method, StopMethod::Booking);
        assert!(approx(long.price, 102.25)); // 100 * (1 + 0.025 * 0.9)

        let short = rules.candidate_stop(100.0, Direction::Short, 0.025);
        assert!(approx(short.price, 97.75));
    }

    #[test]
    fn test_ratchet_monotonic() {
        let mut stop = None;
        for candidate in [99.5, 100.1, 100.0, 101.2, 100.6, 102.25] {
            let next = ratchet(stop, candidate, Direction::Long);
            if let Some(prev) = stop {
                assert!(next >= prev);
            }
            stop = Some(next);
        }
        assert_eq!(stop, Some(102.25));

        let mut stop = None;
        for candidate in [100.5, 99.9, 100.2, 98.8] {
            let next = ratchet(stop, candidate, Direction::Short);
            if let Some(prev) = stop {
                assert!(next <= prev);
            }
            stop = Some(next);
        }
        assert_eq!(stop, Some(98.8));
    }

    #[test]
    fn test_trigger_boundary() {
        assert!(should_trigger(Direction::Long, 99.9, 100.0));
        assert!(!should_trigger(Direction::Long, 100.0, 100.0));
        assert!(should_trigger(Direction::Short, 100.1, 100.0));
        assert!(!should_trigger(Direction::Short, 100.0, 100.0));
    }

    #[test]
    fn test_engine_ratchets_across_ticks() {
        let engine = TrailingEngine::new(TrailingRules::default());
        let mut book = StopBook::new(Duration::from_secs(300));
        let now = Instant::now();

        let d1 = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, pct(100.0, 100.6), 100.6, now);
        assert!(approx(d1.stop, 100.1));
        assert_eq!(d1.action, TrailingAction::Hold);

        let d2 = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, pct(100.0, 101.6), 101.6, now);
        assert!(approx(d2.stop, 101.2));
        assert_eq!(d2.action, TrailingAction::Hold);

        // Profit falls back into the first tier; stored stop holds
        let d3 = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, pct(100.0, 101.3), 101.3, now);
        assert!(approx(d3.stop, 101.2));
        assert_eq!(d3.action, TrailingAction::Hold);
    }

    #[test]
    fn test_engine_booking_keeps_higher_prior_stop() {
        let engine = TrailingEngine::new(TrailingRules::default());
        let mut book = StopBook::new(Duration::from_secs(300));
        let now = Instant::now();
        book.ratchet("p1", Direction::Long, 102.3, now);

        let decision = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, 0.025, 102.5, now);
        assert!(approx(decision.candidate.price, 102.25));
        assert!(approx(decision.stop, 102.3));
        assert_eq!(decision.action, TrailingAction::UpdateBracket);
    }

    #[test]
    fn test_engine_trigger_clears_entry() {
        let engine = TrailingEngine::new(TrailingRules::default());
        let mut book = StopBook::new(Duration::from_secs(300));
        let now = Instant::now();
        book.ratchet("p1", Direction::Long, 101.2, now);

        let decision = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, pct(100.0, 101.0), 101.0, now);
        assert_eq!(decision.action, TrailingAction::Close);
        assert!(book.get("p1").is_none());
    }

    #[test]
    fn test_engine_pushes_dynamic_tiers_when_enabled() {
        let engine = TrailingEngine::new(TrailingRules::default()).with_bracket_push_on_all_tiers(true);
        let mut book = StopBook::new(Duration::from_secs(300));

        let dynamic = engine.evaluate(&mut book, "p1", 100.0, Direction::Long, 0.006, 100.6, Instant::now());
        assert_eq!(dynamic.action, TrailingAction::UpdateBracket);

        // Fixed stop never pushes
        let fixed = engine.evaluate(&mut book, "p2", 100.0, Direction::Long, 0.001, 100.1, Instant::now());
        assert_eq!(fixed.action, TrailingAction::Hold);
    }

    #[test]
    fn test_stop_book_eviction() {
        let mut book = StopBook::new(Duration::from_secs(300));
        let start = Instant::now();
        book.ratchet("open", Direction::Long, 100.0, start);
        book.ratchet("closed", Direction::Short, 90.0, start);
        book.ratchet("idle", Direction::Long, 80.0, start);

        assert_eq!(book.retain_open(["open", "idle"]), 1);
        assert!(book.get("closed").is_none());

        let later = start + Duration::from_secs(200);
        book.ratchet("open", Direction::Long, 99.0, later);
        assert_eq!(book.evict_expired(start + Duration::from_secs(400)), 1);
        assert_eq!(book.get("open"), Some(100.0));
        assert!(book.get("idle").is_none());
    }

    #[test]
    fn test_stop_book_resets_on_direction_flip() {
        let mut book = StopBook::new(Duration::from_secs(300));
        let now = Instant::now();
        book.ratchet("p1", Direction::Long, 105.0, now);

        let stop = book.ratchet("p1", Direction::Short, 110.0, now);
        assert_eq!(stop, 110.0);
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut rules = TrailingRules::default();
        assert!(rules.validate().is_ok());

        rules.levels.push(TrailingTier::booking(0.05, 1.5));
        assert!(rules.validate().is_err());
    }
}
