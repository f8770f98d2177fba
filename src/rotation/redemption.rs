use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::engine::Round;
use crate::markets::Market;

/// Attempts after which a pending redemption is abandoned.
pub const MAX_REDEMPTION_RETRIES: u32 = 20;

/// A settlement deferred until the oracle resolves the market.
#[derive(Clone, Debug, Serialize)]
pub struct PendingRedemption {
    pub market: Market,
    /// Snapshot of the round whose inventory is being redeemed.
    pub round: Round,
    pub market_end_time: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl PendingRedemption {
    pub fn new(market: Market, round: Round, now: DateTime<Utc>) -> Self {
        let market_end_time = market.end_time;
        Self {
            market,
            round,
            market_end_time,
            enqueued_at: now,
            retry_count: 0,
            last_retry_at: None,
        }
    }

    /// Redemption may only be attempted once the mandatory wait after market
    /// end has passed.
    pub fn ready(&self, now: DateTime<Utc>, wait_minutes: i64) -> bool {
        now - self.market_end_time >= Duration::minutes(wait_minutes)
    }

    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
    }

    pub fn exhausted(&self) -> bool {
        self.retry_count > MAX_REDEMPTION_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::{MarketDuration, Underlying};
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn pending() -> PendingRedemption {
        let market = Market {
            condition_id: "0xc0ffee".to_string(),
            slug: "btc-updown-15m-1700000000".to_string(),
            underlying: Underlying::Btc,
            duration: MarketDuration::M15,
            end_time: ts(900),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
        };
        let round = Round::new("r1".to_string(), ts(0), ts(900), 0.0, 0.5, 0.5);
        PendingRedemption::new(market, round, ts(900))
    }

    #[test]
    fn not_ready_until_wait_elapses() {
        let p = pending();
        assert!(!p.ready(ts(900 + 4 * 60), 5));
        assert!(p.ready(ts(900 + 5 * 60), 5));
    }

    #[test]
    fn exhausts_after_retry_cap() {
        let mut p = pending();
        for i in 0..=MAX_REDEMPTION_RETRIES {
            assert!(!p.exhausted(), "must not exhaust at attempt {i}");
            p.record_attempt(ts(1_000 + i as i64));
        }
        assert!(p.exhausted());
    }
}
