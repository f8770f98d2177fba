use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::markets::Side;

/// Lifecycle phase of one monitoring round.
///
/// Transitions are monotonic: `Waiting → Leg1Filled → {Completed, Expired}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Waiting,
    Leg1Filled,
    Completed,
    Expired,
}

/// One executed half of the pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fill {
    pub side: Side,
    pub price: f64,
    pub shares: f64,
    pub token_id: String,
    pub filled_at: DateTime<Utc>,
}

/// One monitoring session over a single market.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Oracle price of the underlying at round start; 0 until first observed.
    pub price_to_beat: f64,
    pub up_open: f64,
    pub down_open: f64,
    pub phase: RoundPhase,
    pub leg1: Option<Fill>,
    pub leg2: Option<Fill>,
    pub total_cost: f64,
    pub profit: f64,
    /// Whether the completed pair has been merged back into quote.
    pub merged: bool,
    /// At-most-once latch for Leg 1 emission within this round.
    pub leg1_signal_emitted: bool,
}

impl Round {
    pub fn new(
        id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        price_to_beat: f64,
        up_open: f64,
        down_open: f64,
    ) -> Self {
        Self {
            id,
            start_time,
            end_time,
            price_to_beat,
            up_open,
            down_open,
            phase: RoundPhase::Waiting,
            leg1: None,
            leg2: None,
            total_cost: 0.0,
            profit: 0.0,
            merged: false,
            leg1_signal_emitted: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RoundPhase::Completed | RoundPhase::Expired)
    }

    /// The unhedged or unmerged inventory still held when the market ends.
    pub fn holds_tokens(&self) -> bool {
        match self.phase {
            RoundPhase::Waiting => false,
            RoundPhase::Leg1Filled | RoundPhase::Expired => self.leg1.is_some(),
            RoundPhase::Completed => !self.merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> Round {
        Round::new(
            "m-r1".to_string(),
            Utc::now(),
            Utc::now(),
            50_000.0,
            0.5,
            0.5,
        )
    }

    #[test]
    fn fresh_round_waits_and_holds_nothing() {
        let r = round();
        assert_eq!(r.phase, RoundPhase::Waiting);
        assert!(!r.is_terminal());
        assert!(!r.holds_tokens());
        assert!(!r.leg1_signal_emitted);
    }

    #[test]
    fn completed_unmerged_round_still_holds_tokens() {
        let mut r = round();
        r.phase = RoundPhase::Completed;
        assert!(r.is_terminal());
        assert!(r.holds_tokens());
        r.merged = true;
        assert!(!r.holds_tokens());
    }
}
