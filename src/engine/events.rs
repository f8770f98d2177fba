use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::markets::{Market, Side, Underlying};
use crate::rotation::SettleStrategy;

use super::round::Fill;

/// Which detector produced a Leg 1 signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Dip,
    Surge,
    Mispricing,
}

/// Entry signal: buy the dipped (or structurally cheap) side.
#[derive(Clone, Debug, Serialize)]
pub struct Leg1Signal {
    pub round_id: String,
    pub side: Side,
    pub source: SignalSource,
    pub current_price: f64,
    /// Reference the move was measured against: the sliding-window price for
    /// dip/surge, the round open for mispricing.
    pub open_price: f64,
    pub drop_percent: f64,
    pub opposite_ask: f64,
    pub target_price: f64,
    pub estimated_total_cost: f64,
    pub estimated_profit_rate: f64,
    pub detected_at: DateTime<Utc>,
}

/// Hedge signal: buy the opposite side to lock the pair below `sum_target`.
#[derive(Clone, Debug, Serialize)]
pub struct Leg2Signal {
    pub round_id: String,
    pub side: Side,
    pub current_price: f64,
    pub target_price: f64,
    pub leg1_price: f64,
    pub total_cost: f64,
    pub expected_profit_rate: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub enum Signal {
    Leg1(Leg1Signal),
    Leg2(Leg2Signal),
}

impl Signal {
    pub fn round_id(&self) -> &str {
        match self {
            Signal::Leg1(s) => &s.round_id,
            Signal::Leg2(s) => &s.round_id,
        }
    }

    pub fn leg_label(&self) -> &'static str {
        match self {
            Signal::Leg1(_) => "leg1",
            Signal::Leg2(_) => "leg2",
        }
    }
}

/// Terminal disposition of one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Completed,
    Expired,
    /// Leg 1 filled but the engine stopped before a hedge.
    Partial,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoundSummary {
    pub round_id: String,
    pub status: RoundStatus,
    pub leg1: Option<Fill>,
    pub leg2: Option<Fill>,
    pub total_cost: f64,
    pub profit: f64,
    pub merged: bool,
    pub merge_tx_hash: Option<String>,
}

/// Structured outcome of one execution attempt, manual or automatic.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub leg: &'static str,
    pub round_id: String,
    pub side: Option<Side>,
    pub price: f64,
    pub shares: f64,
    pub elapsed_ms: i64,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationReason {
    MarketEnded,
    Manual,
    Error,
}

/// Everything the engine and supervisor report to operators, as one tagged
/// stream. Consumers receive plain data only; no handles or callbacks travel
/// through the channel.
#[derive(Clone, Debug, Serialize)]
pub enum EngineEvent {
    Started {
        market: Market,
    },
    Stopped,
    NewRound {
        round_id: String,
        price_to_beat: f64,
        up_open: f64,
        down_open: f64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    Signal(Signal),
    Execution(ExecutionReport),
    RoundComplete(RoundSummary),
    PriceUpdate {
        underlying: Underlying,
        value: f64,
        price_to_beat: f64,
        change_percent: f64,
    },
    Rotate {
        previous_market: Option<String>,
        new_market: String,
        reason: RotationReason,
        timestamp: DateTime<Utc>,
    },
    Settled {
        success: bool,
        strategy: SettleStrategy,
        amount_received: Option<f64>,
        tx_hash: Option<String>,
        error: Option<String>,
    },
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}
