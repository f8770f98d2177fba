use chrono::{DateTime, Utc};
use serde::Serialize;

/// Monotonic counters for one engine instance. Survives market handoffs; a
/// restart onto a new market keeps accumulating into the same counters.
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub rounds_monitored: u64,
    pub rounds_completed: u64,
    pub rounds_successful: u64,
    pub rounds_expired: u64,
    pub signals_detected: u64,
    pub leg1_fills: u64,
    pub leg2_fills: u64,
    /// Cumulative quote spent across all fills.
    pub total_spent: f64,
    /// Cumulative realized profit across completed rounds.
    pub total_profit: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl EngineStats {
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            rounds_monitored: self.rounds_monitored,
            rounds_completed: self.rounds_completed,
            rounds_successful: self.rounds_successful,
            rounds_expired: self.rounds_expired,
            signals_detected: self.signals_detected,
            leg1_fills: self.leg1_fills,
            leg2_fills: self.leg2_fills,
            total_spent: self.total_spent,
            total_profit: self.total_profit,
            running_secs: self
                .started_at
                .map(|t| (now - t).num_seconds().max(0))
                .unwrap_or(0),
        }
    }
}

/// Serializable view of the counters for dashboards and operator queries.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub rounds_monitored: u64,
    pub rounds_completed: u64,
    pub rounds_successful: u64,
    pub rounds_expired: u64,
    pub signals_detected: u64,
    pub leg1_fills: u64,
    pub leg2_fills: u64,
    pub total_spent: f64,
    pub total_profit: f64,
    pub running_secs: i64,
}
