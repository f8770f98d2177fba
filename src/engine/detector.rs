use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::markets::{Market, Side};

use super::config::EngineConfig;
use super::events::{Leg1Signal, Leg2Signal, RoundStatus, RoundSummary, SignalSource};
use super::history::PriceHistory;
use super::round::{Fill, Round, RoundPhase};
use super::stats::EngineStats;

/// State transition or signal produced by one tracker step.
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    NewRound {
        round_id: String,
        price_to_beat: f64,
        up_open: f64,
        down_open: f64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    RoundExpired(RoundSummary),
    Leg1(Leg1Signal),
    Leg2(Leg2Signal),
}

/// Oracle tick accepted by the tracker, for the `priceUpdate` event.
#[derive(Clone, Copy, Debug)]
pub struct OracleUpdate {
    pub value: f64,
    pub price_to_beat: f64,
    pub change_percent: f64,
}

/// Synchronous per-market round state machine.
///
/// All mutation happens through `on_best_ask`, `on_oracle` and the fill
/// appliers, on the caller's single delivery context. The async engine wraps
/// one tracker in a mutex; the replay harness drives one directly.
#[derive(Debug)]
pub struct RoundTracker {
    market: Market,
    config: EngineConfig,
    round: Option<Round>,
    history: PriceHistory,
    up_ask: f64,
    down_ask: f64,
    oracle_price: f64,
    last_execution_at: Option<DateTime<Utc>>,
    round_seq: u64,
    pub stats: EngineStats,
}

impl RoundTracker {
    pub fn new(market: Market, config: EngineConfig, now: DateTime<Utc>) -> Self {
        Self::with_stats(market, config, EngineStats::default(), now)
    }

    /// Restart on a new market while keeping the cumulative counters.
    pub fn with_stats(
        market: Market,
        config: EngineConfig,
        mut stats: EngineStats,
        now: DateTime<Utc>,
    ) -> Self {
        stats.mark_started(now);
        Self {
            market,
            config,
            round: None,
            history: PriceHistory::new(),
            up_ask: 0.0,
            down_ask: 0.0,
            oracle_price: 0.0,
            last_execution_at: None,
            round_seq: 0,
            stats,
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    fn ask(&self, side: Side) -> f64 {
        match side {
            Side::Up => self.up_ask,
            Side::Down => self.down_ask,
        }
    }

    /// Feed one best-ask observation for a side. Returns lifecycle events and
    /// at most one signal, in the order they occurred.
    pub fn on_best_ask(&mut self, side: Side, ask: f64, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        // Out-of-range prices are ignored outright; a binary share trades
        // strictly inside (0, 1).
        if !ask.is_finite() || ask <= 0.0 || ask >= 1.0 {
            return Vec::new();
        }

        match side {
            Side::Up => self.up_ask = ask,
            Side::Down => self.down_ask = ask,
        }

        let mut events = Vec::new();

        if let Some(expired) = self.check_leg2_timeout(now) {
            events.push(TrackerEvent::RoundExpired(expired));
        }

        if let Some(opened) = self.maybe_open_round(now) {
            events.push(opened);
        }

        if self.up_ask > 0.0 && self.down_ask > 0.0 {
            self.history.push(now, self.up_ask, self.down_ask);
        }

        if let Some(signal) = self.detect(now) {
            self.stats.signals_detected += 1;
            events.push(signal);
        }

        events
    }

    /// Feed an oracle tick. Symbols other than this market's underlying are
    /// ignored. The first tick observed backfills a round opened before any
    /// oracle data arrived.
    pub fn on_oracle(&mut self, symbol: &str, price: f64, _now: DateTime<Utc>) -> Option<OracleUpdate> {
        if symbol != self.market.underlying.oracle_symbol() {
            return None;
        }
        if !price.is_finite() || price <= 0.0 {
            return None;
        }

        self.oracle_price = price;

        if let Some(round) = self.round.as_mut() {
            if !round.is_terminal() && round.price_to_beat == 0.0 {
                round.price_to_beat = price;
            }
        }

        let price_to_beat = self
            .round
            .as_ref()
            .map(|r| r.price_to_beat)
            .unwrap_or(0.0);
        let change_percent = if price_to_beat > 0.0 {
            (price - price_to_beat) / price_to_beat * 100.0
        } else {
            0.0
        };

        Some(OracleUpdate {
            value: price,
            price_to_beat,
            change_percent,
        })
    }

    fn check_leg2_timeout(&mut self, now: DateTime<Utc>) -> Option<RoundSummary> {
        let round = self.round.as_mut()?;
        if round.phase != RoundPhase::Leg1Filled {
            return None;
        }
        let leg1 = round.leg1.as_ref()?;
        if now - leg1.filled_at <= Duration::seconds(self.config.leg2_timeout_secs) {
            return None;
        }

        round.phase = RoundPhase::Expired;
        round.total_cost = leg1.price;
        self.stats.rounds_expired += 1;

        Some(RoundSummary {
            round_id: round.id.clone(),
            status: RoundStatus::Expired,
            leg1: round.leg1.clone(),
            leg2: None,
            total_cost: round.total_cost,
            profit: 0.0,
            merged: false,
            merge_tx_hash: None,
        })
    }

    fn maybe_open_round(&mut self, now: DateTime<Utc>) -> Option<TrackerEvent> {
        let needs_round = self.round.as_ref().map_or(true, Round::is_terminal);
        if !needs_round || self.market.has_ended(now) {
            return None;
        }
        if self.up_ask <= 0.0 || self.down_ask <= 0.0 {
            return None;
        }

        self.round_seq += 1;
        let round = Round::new(
            format!("{}-r{}", self.market.slug, self.round_seq),
            now,
            self.market.end_time,
            self.oracle_price,
            self.up_ask,
            self.down_ask,
        );
        self.history.clear();
        self.stats.rounds_monitored += 1;

        let event = TrackerEvent::NewRound {
            round_id: round.id.clone(),
            price_to_beat: round.price_to_beat,
            up_open: round.up_open,
            down_open: round.down_open,
            start_time: round.start_time,
            end_time: round.end_time,
        };
        self.round = Some(round);
        Some(event)
    }

    fn detect(&mut self, now: DateTime<Utc>) -> Option<TrackerEvent> {
        let round = self.round.as_ref()?;
        match round.phase {
            RoundPhase::Waiting => {
                if round.leg1_signal_emitted {
                    return None;
                }
                let signal = self.detect_leg1(now)?;
                if let Some(round) = self.round.as_mut() {
                    round.leg1_signal_emitted = true;
                }
                Some(TrackerEvent::Leg1(signal))
            }
            RoundPhase::Leg1Filled => self.detect_leg2(now).map(TrackerEvent::Leg2),
            _ => None,
        }
    }

    fn detect_leg1(&self, now: DateTime<Utc>) -> Option<Leg1Signal> {
        let round = self.round.as_ref()?;
        let elapsed_ms = (now - round.start_time).num_milliseconds();
        if elapsed_ms > self.config.window_minutes * 60_000 {
            return None;
        }

        self.detect_dip(now)
            .or_else(|| self.detect_surge(now))
            .or_else(|| self.detect_mispricing(now))
    }

    /// Instant dip: side fell at least `dip_threshold` against its price one
    /// sliding window ago. Evaluated UP first, then DOWN.
    fn detect_dip(&self, now: DateTime<Utc>) -> Option<Leg1Signal> {
        let cutoff = now - Duration::milliseconds(self.config.sliding_window_ms);
        let reference = self.history.reference_at(cutoff)?;

        for side in [Side::Up, Side::Down] {
            let current = self.ask(side);
            let reference_price = reference.ask(side);
            if current <= 0.0 || reference_price <= 0.0 {
                continue;
            }
            let drop = (reference_price - current) / reference_price;
            if drop < self.config.dip_threshold {
                continue;
            }

            let signal = self.build_leg1_signal(
                side,
                SignalSource::Dip,
                current,
                reference_price,
                drop,
                self.ask(side.opposite()),
                now,
            );
            if self.validate_leg1(&signal, self.config.dip_threshold) {
                return Some(signal);
            }
        }
        None
    }

    /// Instant surge: a side spiked, so buy the other one at its pre-spike
    /// window reference.
    fn detect_surge(&self, now: DateTime<Utc>) -> Option<Leg1Signal> {
        if !self.config.enable_surge {
            return None;
        }
        let cutoff = now - Duration::milliseconds(self.config.sliding_window_ms);
        let reference = self.history.reference_at(cutoff)?;

        for surging in [Side::Up, Side::Down] {
            let surge_price = self.ask(surging);
            let surge_ref = reference.ask(surging);
            if surge_price <= 0.0 || surge_ref <= 0.0 {
                continue;
            }
            let rise = (surge_price - surge_ref) / surge_ref;
            if rise < self.config.surge_threshold {
                continue;
            }

            let buy = surging.opposite();
            let current = self.ask(buy);
            if current <= 0.0 {
                continue;
            }
            let signal = self.build_leg1_signal(
                buy,
                SignalSource::Surge,
                current,
                reference.ask(buy),
                rise,
                surge_price,
                now,
            );
            if self.validate_leg1(&signal, self.config.surge_threshold) {
                return Some(signal);
            }
        }
        None
    }

    fn validate_leg1(&self, signal: &Leg1Signal, threshold: f64) -> bool {
        if signal.current_price <= 0.0 || signal.current_price >= 1.0 {
            return false;
        }
        if signal.drop_percent < threshold {
            return false;
        }
        // The profit estimate prices the hedge at the opposite ask, which for
        // a surge entry is the spiked side and sums above one by construction;
        // surge profitability comes from the spike retracing, so only dip and
        // mispricing entries are held to the floor.
        if signal.source == SignalSource::Surge {
            return true;
        }
        signal.estimated_profit_rate >= self.config.min_profit_rate
    }

    /// Mispricing against the oracle: a crude win-rate estimate for UP from
    /// the distance to the price-to-beat, compared with what the book charges.
    fn detect_mispricing(&self, now: DateTime<Utc>) -> Option<Leg1Signal> {
        let round = self.round.as_ref()?;
        if self.oracle_price <= 0.0 || round.price_to_beat <= 0.0 {
            return None;
        }

        let move_frac = (self.oracle_price - round.price_to_beat) / round.price_to_beat;
        let p_up = (0.5 + 10.0 * move_frac).clamp(0.05, 0.95);

        let candidates = [
            (Side::Up, p_up - self.up_ask, round.up_open),
            (Side::Down, (1.0 - p_up) - self.down_ask, round.down_open),
        ];
        for (side, edge, open_price) in candidates {
            if edge < self.config.dip_threshold {
                continue;
            }
            let current = self.ask(side);
            if current <= 0.0 {
                continue;
            }
            let signal = self.build_leg1_signal(
                side,
                SignalSource::Mispricing,
                current,
                open_price,
                edge,
                self.ask(side.opposite()),
                now,
            );
            if self.validate_leg1(&signal, self.config.dip_threshold) {
                return Some(signal);
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn build_leg1_signal(
        &self,
        side: Side,
        source: SignalSource,
        current_price: f64,
        open_price: f64,
        drop_percent: f64,
        opposite_ask: f64,
        now: DateTime<Utc>,
    ) -> Leg1Signal {
        let target_price = current_price * (1.0 + self.config.max_slippage);
        let estimated_total_cost = target_price + opposite_ask;
        let estimated_profit_rate = (1.0 - estimated_total_cost) / estimated_total_cost;
        Leg1Signal {
            round_id: self
                .round
                .as_ref()
                .map(|r| r.id.clone())
                .unwrap_or_default(),
            side,
            source,
            current_price,
            open_price,
            drop_percent,
            opposite_ask,
            target_price,
            estimated_total_cost,
            estimated_profit_rate,
            detected_at: now,
        }
    }

    /// Hedge admission: total pair cost at the current hedge ask must not
    /// exceed `sum_target`. The profit gate lives here, not on Leg 1, because
    /// the entry buys an opportunistic dip while the hedge locks the spread.
    fn detect_leg2(&self, now: DateTime<Utc>) -> Option<Leg2Signal> {
        let round = self.round.as_ref()?;
        let leg1 = round.leg1.as_ref()?;
        let hedge_side = leg1.side.opposite();
        let current = self.ask(hedge_side);
        if current <= 0.0 || current >= 1.0 {
            return None;
        }

        let total_cost = leg1.price + current;
        if total_cost > self.config.sum_target {
            return None;
        }

        Some(Leg2Signal {
            round_id: round.id.clone(),
            side: hedge_side,
            current_price: current,
            target_price: current * (1.0 + self.config.max_slippage),
            leg1_price: leg1.price,
            total_cost,
            expected_profit_rate: (1.0 - total_cost) / total_cost,
            detected_at: now,
        })
    }

    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_execution_at {
            None => true,
            Some(last) => now - last >= Duration::milliseconds(self.config.execution_cooldown_ms),
        }
    }

    pub fn mark_execution(&mut self, now: DateTime<Utc>) {
        self.last_execution_at = Some(now);
    }

    /// Record a Leg 1 fill at the slippage-capped target price, the amount
    /// the submitted quote actually committed.
    pub fn apply_leg1_fill(
        &mut self,
        signal: &Leg1Signal,
        now: DateTime<Utc>,
    ) -> Result<Fill, &'static str> {
        let round = self.round.as_mut().ok_or("no active round")?;
        if round.id != signal.round_id {
            return Err("signal is for a previous round");
        }
        if round.phase != RoundPhase::Waiting {
            return Err("round already has a first leg");
        }

        let fill = Fill {
            side: signal.side,
            price: signal.target_price,
            shares: self.config.shares,
            token_id: self.market.token_id(signal.side).to_string(),
            filled_at: now,
        };
        round.leg1 = Some(fill.clone());
        round.phase = RoundPhase::Leg1Filled;
        self.stats.leg1_fills += 1;
        self.stats.total_spent += fill.price * fill.shares;
        debug!(target: "engine", round = %round.id, side = %fill.side, price = fill.price, "leg1 filled");
        Ok(fill)
    }

    /// Record the hedge fill at its observed ask and close out the round.
    pub fn apply_leg2_fill(
        &mut self,
        signal: &Leg2Signal,
        now: DateTime<Utc>,
    ) -> Result<RoundSummary, &'static str> {
        let shares = self.config.shares;
        let round = self.round.as_mut().ok_or("no active round")?;
        if round.id != signal.round_id {
            return Err("signal is for a previous round");
        }
        if round.phase != RoundPhase::Leg1Filled {
            return Err("round has no open first leg");
        }
        let leg1_price = round.leg1.as_ref().map(|f| f.price).unwrap_or(0.0);

        let fill = Fill {
            side: signal.side,
            price: signal.current_price,
            shares,
            token_id: self.market.token_id(signal.side).to_string(),
            filled_at: now,
        };
        round.leg2 = Some(fill.clone());
        round.phase = RoundPhase::Completed;
        round.total_cost = leg1_price + fill.price;
        round.profit = shares * (1.0 - round.total_cost);

        self.stats.leg2_fills += 1;
        self.stats.rounds_completed += 1;
        if round.profit > 0.0 {
            self.stats.rounds_successful += 1;
        }
        self.stats.total_spent += fill.price * shares;
        self.stats.total_profit += round.profit;

        Ok(RoundSummary {
            round_id: round.id.clone(),
            status: RoundStatus::Completed,
            leg1: round.leg1.clone(),
            leg2: round.leg2.clone(),
            total_cost: round.total_cost,
            profit: round.profit,
            merged: false,
            merge_tx_hash: None,
        })
    }

    pub fn mark_merged(&mut self, round_id: &str) {
        if let Some(round) = self.round.as_mut() {
            if round.id == round_id {
                round.merged = true;
            }
        }
    }

    /// Summary for a round interrupted by engine stop with an unhedged leg.
    pub fn partial_summary(&self) -> Option<RoundSummary> {
        let round = self.round.as_ref()?;
        if round.phase != RoundPhase::Leg1Filled {
            return None;
        }
        Some(RoundSummary {
            round_id: round.id.clone(),
            status: RoundStatus::Partial,
            leg1: round.leg1.clone(),
            leg2: None,
            total_cost: round.leg1.as_ref().map(|f| f.price).unwrap_or(0.0),
            profit: 0.0,
            merged: false,
            merge_tx_hash: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn market() -> Market {
        Market {
            condition_id: "0xc0ffee".to_string(),
            slug: "btc-updown-15m-1700000100".to_string(),
            underlying: crate::markets::Underlying::Btc,
            duration: crate::markets::MarketDuration::M15,
            end_time: ts(900),
            up_token_id: "up-token".to_string(),
            down_token_id: "down-token".to_string(),
        }
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn ts_ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn tracker() -> RoundTracker {
        RoundTracker::new(market(), config(), ts(0))
    }

    fn feed(t: &mut RoundTracker, up: f64, down: f64, at: DateTime<Utc>) -> Vec<TrackerEvent> {
        let mut events = t.on_best_ask(Side::Up, up, at);
        events.extend(t.on_best_ask(Side::Down, down, at));
        events
    }

    fn leg1_of(events: &[TrackerEvent]) -> Option<Leg1Signal> {
        events.iter().find_map(|e| match e {
            TrackerEvent::Leg1(s) => Some(s.clone()),
            _ => None,
        })
    }

    fn leg2_of(events: &[TrackerEvent]) -> Option<Leg2Signal> {
        events.iter().find_map(|e| match e {
            TrackerEvent::Leg2(s) => Some(s.clone()),
            _ => None,
        })
    }

    #[test]
    fn first_valid_book_opens_a_round() {
        let mut t = tracker();
        let events = feed(&mut t, 0.50, 0.50, ts(0));
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackerEvent::NewRound { .. })));
        let round = t.round().unwrap();
        assert_eq!(round.phase, RoundPhase::Waiting);
        assert!((round.up_open - 0.50).abs() < 1e-12);
        assert_eq!(t.stats.rounds_monitored, 1);
    }

    #[test]
    fn instant_dip_emits_leg1_with_window_reference() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        feed(&mut t, 0.40, 0.55, ts_ms(2_500));
        // 3.2s in: the t=0 entry sits one full window back.
        let events = feed(&mut t, 0.35, 0.58, ts_ms(3_200));

        let signal = leg1_of(&events).expect("expected a dip signal");
        assert_eq!(signal.side, Side::Up);
        assert_eq!(signal.source, SignalSource::Dip);
        assert!((signal.current_price - 0.35).abs() < 1e-12);
        assert!((signal.open_price - 0.50).abs() < 1e-12);
        assert!((signal.drop_percent - 0.30).abs() < 1e-9);
        assert!((signal.target_price - 0.357).abs() < 1e-9);
        // The opposite ask is DOWN's last seen value when UP's update arrives.
        assert!((signal.opposite_ask - 0.55).abs() < 1e-12);
        assert!((signal.estimated_total_cost - (0.357 + 0.55)).abs() < 1e-9);
        assert_eq!(t.stats.signals_detected, 1);
    }

    #[test]
    fn gradual_trend_never_emits_a_dip() {
        let mut t = tracker();
        // 30% fall spread linearly over 300 seconds, ticking once a second.
        for i in 0..=300i64 {
            let up = 0.50 - 0.15 * (i as f64) / 300.0;
            let events = feed(&mut t, up, 1.0 - up, ts(i));
            assert!(
                leg1_of(&events).is_none(),
                "trend move must not fire at t={i}"
            );
        }
    }

    #[test]
    fn no_reference_means_no_signal() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        // Still inside the sliding window; the only entries are younger than it.
        let events = feed(&mut t, 0.30, 0.65, ts_ms(2_000));
        assert!(leg1_of(&events).is_none());
    }

    #[test]
    fn dip_threshold_of_one_disables_dip_detection() {
        let mut cfg = config();
        cfg.dip_threshold = 1.0;
        cfg.enable_surge = false;
        let mut t = RoundTracker::new(market(), cfg, ts(0));

        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let events = feed(&mut t, 0.01, 0.95, ts_ms(3_500));
        assert!(leg1_of(&events).is_none());
    }

    #[test]
    fn window_minutes_zero_blocks_leg1_after_opening_tick() {
        let mut cfg = config();
        cfg.window_minutes = 0;
        let mut t = RoundTracker::new(market(), cfg, ts(0));

        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let events = feed(&mut t, 0.30, 0.65, ts_ms(4_000));
        assert!(leg1_of(&events).is_none());
    }

    #[test]
    fn surge_buys_the_opposite_side() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        // DOWN softens below the dip threshold, then UP spikes 30%: the spike
        // is the signal and DOWN is the side bought.
        let drift = t.on_best_ask(Side::Down, 0.44, ts_ms(3_100));
        assert!(leg1_of(&drift).is_none());
        let events = t.on_best_ask(Side::Up, 0.65, ts_ms(3_200));

        let signal = leg1_of(&events).expect("expected a surge signal");
        assert_eq!(signal.source, SignalSource::Surge);
        assert_eq!(signal.side, Side::Down);
        assert!((signal.current_price - 0.44).abs() < 1e-12);
        // Reference recorded is DOWN's own window price.
        assert!((signal.open_price - 0.50).abs() < 1e-12);
        assert!((signal.opposite_ask - 0.65).abs() < 1e-12);
    }

    #[test]
    fn surge_detection_can_be_disabled() {
        let mut cfg = config();
        cfg.enable_surge = false;
        let mut t = RoundTracker::new(market(), cfg, ts(0));

        feed(&mut t, 0.50, 0.50, ts_ms(0));
        // Rise on UP without a qualifying dip anywhere.
        let events = feed(&mut t, 0.65, 0.44, ts_ms(3_200));
        assert!(leg1_of(&events).is_none());
    }

    #[test]
    fn mispricing_fires_when_oracle_disagrees_with_book() {
        let mut t = tracker();
        t.on_oracle("BTC/USD", 50_000.0, ts(0));
        feed(&mut t, 0.40, 0.55, ts(1));
        // Oracle moved 1% over the beat price: p_up = 0.5 + 10 * 0.01 = 0.6.
        t.on_oracle("BTC/USD", 50_500.0, ts(2));
        let events = feed(&mut t, 0.40, 0.55, ts(3));

        let signal = leg1_of(&events).expect("expected a mispricing signal");
        assert_eq!(signal.source, SignalSource::Mispricing);
        assert_eq!(signal.side, Side::Up);
        assert!((signal.drop_percent - (0.6 - 0.40)).abs() < 1e-9);
        // Mispricing records the round open, not a window reference.
        assert!((signal.open_price - 0.40).abs() < 1e-12);
    }

    #[test]
    fn oracle_symbol_mismatch_is_ignored() {
        let mut t = tracker();
        assert!(t.on_oracle("ETH/USD", 3_000.0, ts(0)).is_none());
        feed(&mut t, 0.50, 0.50, ts(1));
        assert!(t.round().unwrap().price_to_beat.abs() < f64::EPSILON);
    }

    #[test]
    fn late_oracle_tick_backfills_price_to_beat() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts(0));
        assert!(t.round().unwrap().price_to_beat.abs() < f64::EPSILON);

        let update = t.on_oracle("BTC/USD", 50_000.0, ts(5)).unwrap();
        assert!((update.price_to_beat - 50_000.0).abs() < 1e-9);
        assert!((t.round().unwrap().price_to_beat - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn leg1_signal_is_emitted_at_most_once_per_round() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let first = feed(&mut t, 0.35, 0.58, ts_ms(3_200));
        assert!(leg1_of(&first).is_some());

        // The dip persists but the latch holds.
        let second = feed(&mut t, 0.34, 0.58, ts_ms(3_400));
        assert!(leg1_of(&second).is_none());
        let third = feed(&mut t, 0.33, 0.58, ts_ms(3_600));
        assert!(leg1_of(&third).is_none());
        assert_eq!(t.stats.signals_detected, 1);
    }

    #[test]
    fn full_round_dip_then_hedge() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        feed(&mut t, 0.40, 0.55, ts_ms(2_500));
        let events = feed(&mut t, 0.35, 0.58, ts_ms(3_200));
        let leg1 = leg1_of(&events).unwrap();

        t.apply_leg1_fill(&leg1, ts_ms(3_300)).unwrap();
        assert_eq!(t.round().unwrap().phase, RoundPhase::Leg1Filled);

        // Hedge at 0.58: 0.357 + 0.58 = 0.937 <= 0.95.
        let events = feed(&mut t, 0.36, 0.58, ts_ms(30_000));
        let leg2 = leg2_of(&events).expect("expected a hedge signal");
        assert!((leg2.total_cost - 0.937).abs() < 1e-9);
        assert!((leg2.expected_profit_rate - (1.0 - 0.937) / 0.937).abs() < 1e-9);

        let summary = t.apply_leg2_fill(&leg2, ts_ms(30_100)).unwrap();
        assert_eq!(summary.status, RoundStatus::Completed);
        assert!((summary.profit - 20.0 * (1.0 - 0.937)).abs() < 1e-6);
        assert_eq!(t.stats.rounds_completed, 1);
        assert_eq!(t.stats.rounds_successful, 1);
        assert!(t.stats.signals_detected >= t.stats.leg1_fills + t.stats.leg2_fills);
    }

    #[test]
    fn hedge_is_suppressed_above_sum_target() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let events = feed(&mut t, 0.40, 0.60, ts_ms(3_200));
        let leg1 = leg1_of(&events).unwrap();
        t.apply_leg1_fill(&leg1, ts_ms(3_300)).unwrap();

        // 0.408 + 0.60 = 1.008 > 0.95: no hedge.
        let events = feed(&mut t, 0.41, 0.60, ts_ms(10_000));
        assert!(leg2_of(&events).is_none());
    }

    #[test]
    fn leg2_timeout_expires_the_round() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let events = feed(&mut t, 0.40, 0.60, ts_ms(3_200));
        let leg1 = leg1_of(&events).unwrap();
        t.apply_leg1_fill(&leg1, ts_ms(3_300)).unwrap();

        // Hedge never admits; 301 seconds after the fill the round expires.
        let events = feed(&mut t, 0.40, 0.62, ts_ms(3_300 + 301_000));
        let expired = events.iter().find_map(|e| match e {
            TrackerEvent::RoundExpired(s) => Some(s.clone()),
            _ => None,
        });
        let summary = expired.expect("expected expiry");
        assert_eq!(summary.status, RoundStatus::Expired);
        assert!(summary.leg2.is_none());
        assert_eq!(t.stats.rounds_expired, 1);

        // A replacement round opens in the same tick.
        assert_eq!(t.round().unwrap().phase, RoundPhase::Waiting);
        assert_eq!(t.stats.rounds_monitored, 2);
    }

    #[test]
    fn duplicate_fill_application_is_rejected() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        let events = feed(&mut t, 0.35, 0.58, ts_ms(3_200));
        let leg1 = leg1_of(&events).unwrap();

        assert!(t.apply_leg1_fill(&leg1, ts_ms(3_300)).is_ok());
        assert!(t.apply_leg1_fill(&leg1, ts_ms(3_400)).is_err());
    }

    #[test]
    fn out_of_range_prices_are_ignored() {
        let mut t = tracker();
        assert!(t.on_best_ask(Side::Up, 0.0, ts(0)).is_empty());
        assert!(t.on_best_ask(Side::Up, 1.0, ts(0)).is_empty());
        assert!(t.on_best_ask(Side::Up, -0.2, ts(0)).is_empty());
        assert!(t.on_best_ask(Side::Up, f64::NAN, ts(0)).is_empty());
        assert!(t.round().is_none());
    }

    #[test]
    fn no_round_opens_after_market_end() {
        let mut t = tracker();
        let events = feed(&mut t, 0.50, 0.50, ts(901));
        assert!(events.is_empty());
        assert!(t.round().is_none());
    }

    #[test]
    fn cooldown_gates_repeat_executions() {
        let mut t = tracker();
        assert!(t.cooldown_elapsed(ts_ms(0)));
        t.mark_execution(ts_ms(0));
        assert!(!t.cooldown_elapsed(ts_ms(1_000)));
        assert!(t.cooldown_elapsed(ts_ms(3_000)));
    }

    #[test]
    fn partial_summary_reports_unhedged_stop() {
        let mut t = tracker();
        feed(&mut t, 0.50, 0.50, ts_ms(0));
        assert!(t.partial_summary().is_none());

        let events = feed(&mut t, 0.35, 0.58, ts_ms(3_200));
        let leg1 = leg1_of(&events).unwrap();
        t.apply_leg1_fill(&leg1, ts_ms(3_300)).unwrap();

        let partial = t.partial_summary().expect("expected partial summary");
        assert_eq!(partial.status, RoundStatus::Partial);
        assert!(partial.leg1.is_some());
        assert!(partial.leg2.is_none());
    }
}
