use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row model for the time-series of best-ask pairs stored in TimescaleDB.
/// Replays load these back in timestamp order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AskTickRow {
    pub ts: DateTime<Utc>,
    pub market_slug: String,
    pub up_ask: f64,
    pub down_ask: f64,
}

/// Row model capturing one finished round.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoundResultRow {
    pub ts: DateTime<Utc>,
    pub market_slug: String,
    pub round_id: String,
    pub status: String,
    pub leg1_side: Option<String>,
    pub leg1_price: Option<f64>,
    pub leg2_side: Option<String>,
    pub leg2_price: Option<f64>,
    pub shares: f64,
    pub total_cost: f64,
    pub profit: f64,
    pub merged: bool,
    pub merge_tx_hash: Option<String>,
}
