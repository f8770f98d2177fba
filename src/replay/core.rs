use crate::engine::{EngineConfig, RoundTracker, TrackerEvent};
use crate::markets::{Market, Side};
use crate::storage::models::AskTickRow;

#[derive(Clone, Debug)]
pub struct ReplayTrade {
    pub round_id: String,
    pub leg1_price: f64,
    pub leg2_price: f64,
    pub shares: f64,
    pub profit: f64,
}

#[derive(Clone, Debug)]
pub struct ReplayResult {
    pub ticks_processed: usize,
    pub signals_detected: u64,
    pub rounds_monitored: u64,
    pub rounds_expired: u64,
    pub trades: Vec<ReplayTrade>,
    pub total_profit: f64,
}

/// Deterministically replay a recorded best-ask series through the round
/// state machine, filling every signal immediately.
///
/// The caller provides ticks in time-ascending order; given the same ticks
/// and config the result is fully deterministic.
pub fn run_replay_on_ticks(
    market: &Market,
    config: &EngineConfig,
    ticks: &[AskTickRow],
) -> ReplayResult {
    let started = ticks
        .first()
        .map(|t| t.ts)
        .unwrap_or_else(chrono::Utc::now);
    let mut tracker = RoundTracker::new(market.clone(), config.clone(), started);

    let mut trades = Vec::new();
    let mut processed = 0usize;

    for tick in ticks {
        processed += 1;
        let mut events = tracker.on_best_ask(Side::Up, tick.up_ask, tick.ts);
        events.extend(tracker.on_best_ask(Side::Down, tick.down_ask, tick.ts));

        for event in events {
            match event {
                TrackerEvent::Leg1(signal) => {
                    // Replays assume the taker order fills at its target.
                    let _ = tracker.apply_leg1_fill(&signal, tick.ts);
                }
                TrackerEvent::Leg2(signal) => {
                    if let Ok(summary) = tracker.apply_leg2_fill(&signal, tick.ts) {
                        trades.push(ReplayTrade {
                            round_id: summary.round_id,
                            leg1_price: summary.leg1.as_ref().map(|f| f.price).unwrap_or(0.0),
                            leg2_price: summary.leg2.as_ref().map(|f| f.price).unwrap_or(0.0),
                            shares: summary.leg1.as_ref().map(|f| f.shares).unwrap_or(0.0),
                            profit: summary.profit,
                        });
                    }
                }
                TrackerEvent::NewRound { .. } | TrackerEvent::RoundExpired(_) => {}
            }
        }
    }

    ReplayResult {
        ticks_processed: processed,
        signals_detected: tracker.stats.signals_detected,
        rounds_monitored: tracker.stats.rounds_monitored,
        rounds_expired: tracker.stats.rounds_expired,
        total_profit: trades.iter().map(|t| t.profit).sum(),
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::market_from_slug;
    use chrono::{DateTime, TimeZone, Utc};

    fn tick(slug: &str, millis: i64, up: f64, down: f64) -> AskTickRow {
        AskTickRow {
            ts: ts_ms(millis),
            market_slug: slug.to_string(),
            up_ask: up,
            down_ask: down,
        }
    }

    fn ts_ms(millis: i64) -> DateTime<Utc> {
        // Aligned with the btc-updown-15m-1704110400 round start.
        Utc.timestamp_millis_opt(1_704_110_400_000 + millis).unwrap()
    }

    #[test]
    fn replay_reproduces_a_dip_round() {
        let slug = "btc-updown-15m-1704110400";
        let market = market_from_slug(slug).unwrap();
        let config = EngineConfig::default();

        let ticks = vec![
            tick(slug, 0, 0.50, 0.50),
            tick(slug, 2_500, 0.40, 0.55),
            tick(slug, 3_200, 0.35, 0.58),
            tick(slug, 30_000, 0.36, 0.58),
        ];

        let result = run_replay_on_ticks(&market, &config, &ticks);
        assert_eq!(result.ticks_processed, 4);
        assert_eq!(result.rounds_monitored, 1);
        assert_eq!(result.trades.len(), 1);

        let trade = &result.trades[0];
        assert!((trade.leg1_price - 0.357).abs() < 1e-9);
        assert!((trade.leg2_price - 0.58).abs() < 1e-9);
        assert!((trade.profit - 20.0 * (1.0 - 0.937)).abs() < 1e-6);
    }

    #[test]
    fn replay_of_flat_ticks_trades_nothing() {
        let slug = "btc-updown-15m-1704110400";
        let market = market_from_slug(slug).unwrap();
        let config = EngineConfig::default();

        let ticks: Vec<AskTickRow> = (0..60)
            .map(|i| tick(slug, i * 1_000, 0.50, 0.50))
            .collect();

        let result = run_replay_on_ticks(&market, &config, &ticks);
        assert_eq!(result.trades.len(), 0);
        assert_eq!(result.signals_detected, 0);
        assert!(result.total_profit.abs() < f64::EPSILON);
    }
}
