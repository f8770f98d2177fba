use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::engine::{DipArbEngine, EngineError, EngineEvent, RotationReason, Round};
use crate::execution::{
    ExecutionBackend, MarketOrderRequest, OrderSide, SettlementBackend, TokenPair,
};
use crate::markets::{
    scan_crypto_short_term_markets, Market, MarketDuration, MarketQuery, SortBy, Underlying,
};
use crate::orderbook::OrderbookService;
use crate::types::RotationSettings;

pub mod redemption;

pub use redemption::{PendingRedemption, MAX_REDEMPTION_RETRIES};

/// Cadence of the end-of-round scan.
const ROTATION_TICK: StdDuration = StdDuration::from_secs(30);
/// Successor markets must end within this window from now.
const SCAN_MIN_MINUTES: i64 = 5;
const SCAN_MAX_MINUTES: i64 = 30;

/// What to do with inventory still held when a market ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleStrategy {
    /// Wait for oracle resolution, then claim the winning side.
    Redeem,
    /// Dump both legs at market immediately.
    Sell,
}

impl FromStr for SettleStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redeem" => Ok(SettleStrategy::Redeem),
            "sell" => Ok(SettleStrategy::Sell),
            other => Err(format!("unsupported settle strategy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RotationConfig {
    pub underlyings: Vec<Underlying>,
    pub duration: MarketDuration,
    pub preload_minutes: i64,
    pub auto_settle: bool,
    pub settle_strategy: SettleStrategy,
    pub redeem_wait_minutes: i64,
    pub redeem_retry_interval_secs: u64,
}

impl TryFrom<&RotationSettings> for RotationConfig {
    type Error = String;

    fn try_from(settings: &RotationSettings) -> Result<Self, Self::Error> {
        if settings.underlyings.is_empty() {
            return Err("rotation needs at least one underlying".to_string());
        }
        let underlyings = settings
            .underlyings
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Underlying>, _>>()?;
        Ok(Self {
            underlyings,
            duration: settings.duration.parse()?,
            preload_minutes: settings.preload_minutes,
            auto_settle: settings.auto_settle,
            settle_strategy: settings.settle_strategy.parse()?,
            redeem_wait_minutes: settings.redeem_wait_minutes,
            redeem_retry_interval_secs: settings.redeem_retry_interval_secs,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct SupervisorInner {
    engine: DipArbEngine,
    execution: Arc<ExecutionBackend>,
    settlement: Arc<SettlementBackend>,
    orderbook: Option<Arc<OrderbookService>>,
    http: reqwest::Client,
    gamma_url: String,
    events: mpsc::UnboundedSender<EngineEvent>,
    config: Mutex<Option<RotationConfig>>,
    next_market: Mutex<Option<Market>>,
    pending: Mutex<Vec<PendingRedemption>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

/// Keeps the engine trading across back-to-back rounds: preloads the
/// successor market, hands the engine over at the boundary, and settles
/// whatever inventory the old market left behind.
///
/// The supervisor owns the pending-redemption queue and the preload slot; it
/// talks to the engine only through its public operations.
#[derive(Clone)]
pub struct RotationSupervisor {
    inner: Arc<SupervisorInner>,
}

impl RotationSupervisor {
    pub fn new(
        engine: DipArbEngine,
        execution: Arc<ExecutionBackend>,
        settlement: Arc<SettlementBackend>,
        orderbook: Option<Arc<OrderbookService>>,
        http: reqwest::Client,
        gamma_url: String,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                engine,
                execution,
                settlement,
                orderbook,
                http,
                gamma_url,
                events,
                config: Mutex::new(None),
                next_market: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                tickers: Mutex::new(Vec::new()),
            }),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Start the rotation and redemption tickers. The first rotation check
    /// runs immediately.
    pub fn enable_rotation(&self, config: RotationConfig) -> Result<(), EngineError> {
        let mut tickers = lock(&self.inner.tickers);
        if !tickers.is_empty() {
            return Err(EngineError::Validation(
                "rotation is already enabled".to_string(),
            ));
        }

        let redeem_interval = StdDuration::from_secs(config.redeem_retry_interval_secs.max(1));
        *lock(&self.inner.config) = Some(config);

        let rotation = self.clone();
        tickers.push(tokio::spawn(async move {
            let mut tick = interval(ROTATION_TICK);
            loop {
                tick.tick().await;
                rotation.rotation_tick().await;
            }
        }));

        let redemption = self.clone();
        tickers.push(tokio::spawn(async move {
            let mut tick = interval(redeem_interval);
            // The first interval tick fires immediately; nothing can be ready
            // that early, so skip it.
            tick.tick().await;
            loop {
                tick.tick().await;
                redemption.redemption_tick().await;
            }
        }));

        info!(target: "rotation", "auto-rotation enabled");
        Ok(())
    }

    /// Stop the tickers. Pending redemptions stay queued but will not be
    /// retried until rotation is enabled again.
    pub fn disable_rotation(&self) {
        let mut tickers = lock(&self.inner.tickers);
        for handle in tickers.drain(..) {
            handle.abort();
        }
        *lock(&self.inner.config) = None;

        let pending = lock(&self.inner.pending).len();
        if pending > 0 {
            warn!(
                target: "rotation",
                pending,
                "rotation disabled with redemptions still queued"
            );
        } else {
            info!(target: "rotation", "auto-rotation disabled");
        }
    }

    /// Force an immediate scan-and-swap regardless of the market clock.
    pub async fn rotate_now(&self) {
        let Some(config) = lock(&self.inner.config).clone() else {
            warn!(target: "rotation", "rotate_now called while rotation is disabled");
            return;
        };
        self.swap_market(&config, RotationReason::Manual).await;
    }

    /// Snapshot of the redemption queue.
    pub fn pending_redemptions(&self) -> Vec<PendingRedemption> {
        lock(&self.inner.pending).clone()
    }

    async fn rotation_tick(&self) {
        let Some(config) = lock(&self.inner.config).clone() else {
            return;
        };
        if !self.inner.engine.is_active() {
            return;
        }
        let Some(market) = self.inner.engine.market() else {
            return;
        };

        let now = Utc::now();
        let seconds_left = market.seconds_until_end(now);

        if seconds_left <= config.preload_minutes * 60
            && lock(&self.inner.next_market).is_none()
        {
            if let Some(next) = self.scan(&config, Some(&market.condition_id)).await {
                info!(
                    target: "rotation",
                    current = %market.slug,
                    next = %next.slug,
                    "preloaded successor market"
                );
                *lock(&self.inner.next_market) = Some(next);
            }
        }

        if seconds_left <= 0 {
            self.swap_market(&config, RotationReason::MarketEnded).await;
        }
    }

    async fn swap_market(&self, config: &RotationConfig, reason: RotationReason) {
        let now = Utc::now();
        let previous = self.inner.engine.market();

        if config.auto_settle {
            if let (Some(market), Some(round)) = (&previous, self.inner.engine.current_round()) {
                if round.leg1.is_some() && round.holds_tokens() {
                    match config.settle_strategy {
                        SettleStrategy::Redeem => {
                            info!(
                                target: "rotation",
                                market = %market.slug,
                                round = %round.id,
                                "queueing position for redemption"
                            );
                            lock(&self.inner.pending).push(PendingRedemption::new(
                                market.clone(),
                                round,
                                now,
                            ));
                        }
                        SettleStrategy::Sell => self.sell_position(market, &round).await,
                    }
                }
            }
        }

        self.inner.engine.stop().await;

        let preloaded_next = lock(&self.inner.next_market).take();
        let next = match preloaded_next {
            Some(market) => Some(market),
            None => {
                self.scan(config, previous.as_ref().map(|m| m.condition_id.as_str()))
                    .await
            }
        };

        let Some(next) = next else {
            self.emit(EngineEvent::Error {
                code: "MARKET_NOT_FOUND".to_string(),
                message: "no successor market available".to_string(),
                retryable: true,
            });
            return;
        };

        match self.inner.engine.start(next.clone()).await {
            Ok(()) => self.emit(EngineEvent::Rotate {
                previous_market: previous.map(|m| m.slug),
                new_market: next.slug,
                reason,
                timestamp: now,
            }),
            Err(err) => self.emit(EngineEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                retryable: err.retryable(),
            }),
        }
    }

    /// Dump both held legs at market. `amount_received` is estimated from the
    /// best bid each sell crosses into.
    async fn sell_position(&self, market: &Market, round: &Round) {
        info!(
            target: "rotation",
            market = %market.slug,
            round = %round.id,
            "selling leftover position at market"
        );
        for fill in [round.leg1.as_ref(), round.leg2.as_ref()]
            .into_iter()
            .flatten()
        {
            let best_bid = match &self.inner.orderbook {
                Some(service) => service
                    .fetch_book(&fill.token_id)
                    .await
                    .map(|b| b.best_bid_price())
                    .unwrap_or(0.0),
                None => 0.0,
            };

            let request = MarketOrderRequest {
                token_id: fill.token_id.clone(),
                side: OrderSide::Sell,
                shares: fill.shares,
                limit_price: best_bid,
                quote_amount: fill.shares,
                client_order_id: format!("{}-settle-{}", round.id, fill.side),
            };
            let result = self.inner.execution.market_order(&request).await;

            self.emit(EngineEvent::Settled {
                success: result.success,
                strategy: SettleStrategy::Sell,
                amount_received: (best_bid > 0.0).then(|| fill.shares * best_bid),
                tx_hash: result.transaction_hashes.first().cloned(),
                error: result.error_message,
            });
        }
    }

    async fn redemption_tick(&self) {
        let Some(config) = lock(&self.inner.config).clone() else {
            return;
        };
        let now = Utc::now();

        let queue = std::mem::take(&mut *lock(&self.inner.pending));
        if queue.is_empty() {
            return;
        }
        let mut kept = Vec::new();

        for mut item in queue {
            if !item.ready(now, config.redeem_wait_minutes) {
                kept.push(item);
                continue;
            }

            let resolution = self
                .inner
                .settlement
                .get_market_resolution(&item.market.condition_id)
                .await;

            match resolution {
                Ok(res) if res.is_resolved => {
                    let pair = TokenPair {
                        yes_token_id: item.market.up_token_id.clone(),
                        no_token_id: item.market.down_token_id.clone(),
                    };
                    let result = self
                        .inner
                        .settlement
                        .redeem_by_token_ids(&item.market.condition_id, &pair)
                        .await;
                    info!(
                        target: "rotation",
                        market = %item.market.slug,
                        success = result.success,
                        "redemption attempted"
                    );
                    self.emit(EngineEvent::Settled {
                        success: result.success,
                        strategy: SettleStrategy::Redeem,
                        amount_received: result.usdc_received,
                        tx_hash: result.tx_hash,
                        error: result.error,
                    });
                    // Removed from the queue on return, success or not.
                }
                Ok(_) => {
                    item.record_attempt(now);
                    debug!(
                        target: "rotation",
                        market = %item.market.slug,
                        retries = item.retry_count,
                        "market not yet resolved"
                    );
                    if item.exhausted() {
                        self.emit(EngineEvent::Settled {
                            success: false,
                            strategy: SettleStrategy::Redeem,
                            amount_received: None,
                            tx_hash: None,
                            error: Some(format!(
                                "gave up after {} resolution checks",
                                item.retry_count
                            )),
                        });
                    } else {
                        kept.push(item);
                    }
                }
                Err(err) => {
                    item.record_attempt(now);
                    warn!(
                        target: "rotation",
                        market = %item.market.slug,
                        error = %err,
                        "resolution check failed"
                    );
                    if item.exhausted() {
                        self.emit(EngineEvent::Settled {
                            success: false,
                            strategy: SettleStrategy::Redeem,
                            amount_received: None,
                            tx_hash: None,
                            error: Some(err.to_string()),
                        });
                    } else {
                        kept.push(item);
                    }
                }
            }
        }

        lock(&self.inner.pending).extend(kept);
    }

    async fn scan(&self, config: &RotationConfig, exclude: Option<&str>) -> Option<Market> {
        let query = MarketQuery {
            underlyings: config.underlyings.clone(),
            durations: vec![config.duration],
            min_minutes_until_end: SCAN_MIN_MINUTES,
            max_minutes_until_end: SCAN_MAX_MINUTES,
            limit: 10,
            sort_by: SortBy::EndDate,
            exclude_condition_ids: exclude.map(|id| vec![id.to_string()]).unwrap_or_default(),
        };

        match scan_crypto_short_term_markets(&self.inner.http, &self.inner.gamma_url, &query).await
        {
            Ok(found) => found.into_iter().next().map(|d| d.market),
            Err(err) => {
                self.emit(EngineEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                    retryable: err.retryable(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_strategy_parses_case_insensitively() {
        assert_eq!("redeem".parse::<SettleStrategy>(), Ok(SettleStrategy::Redeem));
        assert_eq!("SELL".parse::<SettleStrategy>(), Ok(SettleStrategy::Sell));
        assert!("hold".parse::<SettleStrategy>().is_err());
    }

    #[test]
    fn rotation_config_from_settings() {
        let settings = RotationSettings {
            underlyings: vec!["btc".to_string(), "ETH".to_string()],
            duration: "15m".to_string(),
            preload_minutes: 2,
            auto_settle: true,
            settle_strategy: "redeem".to_string(),
            redeem_wait_minutes: 5,
            redeem_retry_interval_secs: 30,
        };

        let config = RotationConfig::try_from(&settings).expect("settings should convert");
        assert_eq!(config.underlyings, vec![Underlying::Btc, Underlying::Eth]);
        assert_eq!(config.duration, MarketDuration::M15);
        assert_eq!(config.settle_strategy, SettleStrategy::Redeem);
    }

    #[test]
    fn rotation_config_rejects_unknown_underlying() {
        let settings = RotationSettings {
            underlyings: vec!["doge".to_string()],
            duration: "15m".to_string(),
            preload_minutes: 2,
            auto_settle: true,
            settle_strategy: "redeem".to_string(),
            redeem_wait_minutes: 5,
            redeem_retry_interval_secs: 30,
        };
        assert!(RotationConfig::try_from(&settings).is_err());
    }
}
