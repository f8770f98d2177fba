use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::realtime::{OraclePrice, RealtimeClient, SubscriptionHandle};
use crate::client::ClientError;
use crate::execution::{
    ExecutionBackend, MarketOrderRequest, MergeResult, OrderSide, SettlementBackend,
};
use crate::markets::Market;
use crate::orderbook::OrderbookSnapshot;

pub mod config;
pub mod detector;
pub mod events;
pub mod history;
pub mod round;
pub mod stats;

pub use config::EngineConfig;
pub use detector::{OracleUpdate, RoundTracker, TrackerEvent};
pub use events::{
    EngineEvent, ExecutionReport, Leg1Signal, Leg2Signal, RotationReason, RoundStatus,
    RoundSummary, Signal, SignalSource,
};
pub use history::{PriceHistory, PricePoint, HISTORY_CAPACITY};
pub use round::{Fill, Round, RoundPhase};
pub use stats::{EngineStats, StatsSnapshot};

/// How long `start` waits for the transport before proceeding optimistically.
const TRANSPORT_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already monitoring {0}")]
    AlreadyActive(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("engine is not active")]
    NotActive,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("market resolution pending: {0}")]
    ResolutionPending(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::AlreadyActive(_) | EngineError::Validation(_) | EngineError::NotActive => {
                "VALIDATION"
            }
            EngineError::ExecutionFailed(_) => "EXECUTION_FAILED",
            EngineError::ResolutionPending(_) => "RESOLUTION_PENDING",
            EngineError::Client(err) => err.code(),
            EngineError::Fatal(_) => "FATAL",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            EngineError::ResolutionPending(_) => true,
            EngineError::Client(err) => err.retryable(),
            _ => false,
        }
    }
}

struct EngineSession {
    market_sub: SubscriptionHandle,
    oracle_sub: SubscriptionHandle,
    delivery: JoinHandle<()>,
}

struct EngineInner {
    execution: Arc<ExecutionBackend>,
    settlement: Arc<SettlementBackend>,
    realtime: Arc<RealtimeClient>,
    events: mpsc::UnboundedSender<EngineEvent>,
    config: Mutex<EngineConfig>,
    tracker: Mutex<Option<RoundTracker>>,
    session: Mutex<Option<EngineSession>>,
    active: AtomicBool,
    is_executing: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears the in-flight flag when an execution path unwinds.
struct ExecutingGuard<'a>(&'a AtomicBool);

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Dip-arbitrage engine monitoring one market at a time.
///
/// All round state lives in a single tracker behind one mutex; order book and
/// oracle deliveries mutate it from the delivery task, while `start`, `stop`
/// and the manual execution endpoints may be called concurrently from a
/// supervisor context. Executions run with the mutex released and re-validate
/// the round before applying their fill.
#[derive(Clone)]
pub struct DipArbEngine {
    inner: Arc<EngineInner>,
}

impl DipArbEngine {
    pub fn new(
        config: EngineConfig,
        execution: Arc<ExecutionBackend>,
        settlement: Arc<SettlementBackend>,
        realtime: Arc<RealtimeClient>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                execution,
                settlement,
                realtime,
                events,
                config: Mutex::new(config),
                tracker: Mutex::new(None),
                session: Mutex::new(None),
                active: AtomicBool::new(false),
                is_executing: AtomicBool::new(false),
            }),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if lock(&self.inner.config).debug {
            tracing::info!(target: "engine", ?event, "event");
        } else {
            debug!(target: "engine", ?event, "event");
        }
        let _ = self.inner.events.send(event);
    }

    /// Atomically replace the configuration. Applies to the live tracker
    /// immediately; idempotent when handed the same snapshot twice.
    pub fn configure(&self, config: EngineConfig) {
        *lock(&self.inner.config) = config.clone();
        if let Some(tracker) = lock(&self.inner.tracker).as_mut() {
            tracker.set_config(config);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Market currently (or last) monitored.
    pub fn market(&self) -> Option<Market> {
        lock(&self.inner.tracker)
            .as_ref()
            .map(|t| t.market().clone())
    }

    pub fn current_round(&self) -> Option<Round> {
        lock(&self.inner.tracker)
            .as_ref()
            .and_then(|t| t.round().cloned())
    }

    pub fn statistics(&self) -> StatsSnapshot {
        let now = Utc::now();
        lock(&self.inner.tracker)
            .as_ref()
            .map(|t| t.stats.snapshot(now))
            .unwrap_or_else(|| EngineStats::default().snapshot(now))
    }

    /// Begin monitoring a market. Fails when the engine is already active or
    /// the market is missing a token id. Counters carry over from any market
    /// monitored before.
    pub async fn start(&self, market: Market) -> Result<(), EngineError> {
        market.validate().map_err(EngineError::Validation)?;
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let current = self.market().map(|m| m.slug).unwrap_or_default();
            return Err(EngineError::AlreadyActive(current));
        }

        let config = lock(&self.inner.config).clone();
        let carried = lock(&self.inner.tracker)
            .take()
            .map(|t| t.stats)
            .unwrap_or_default();
        *lock(&self.inner.tracker) = Some(RoundTracker::with_stats(
            market.clone(),
            config,
            carried,
            Utc::now(),
        ));

        let tokens = [market.up_token_id.clone(), market.down_token_id.clone()];
        let (market_sub, book_rx) = self.inner.realtime.subscribe_markets(&tokens);
        let (oracle_sub, oracle_rx) = self
            .inner
            .realtime
            .subscribe_oracle_prices(&[market.underlying.oracle_symbol()]);

        if !self.inner.realtime.wait_connected(TRANSPORT_READY_TIMEOUT).await {
            warn!(
                target: "engine",
                market = %market.slug,
                "transport not ready after 10s; proceeding optimistically"
            );
        }

        let delivery = tokio::spawn(run_delivery(self.clone(), book_rx, oracle_rx));
        *lock(&self.inner.session) = Some(EngineSession {
            market_sub,
            oracle_sub,
            delivery,
        });

        self.emit(EngineEvent::Started { market });
        Ok(())
    }

    /// Stop monitoring. Idempotent; any in-flight execution completes but its
    /// effect on round state is discarded.
    pub async fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(session) = lock(&self.inner.session).take() {
            session.market_sub.unsubscribe();
            session.oracle_sub.unsubscribe();
            session.delivery.abort();
        }

        let partial = lock(&self.inner.tracker)
            .as_ref()
            .and_then(|t| t.partial_summary());
        if let Some(summary) = partial {
            self.emit(EngineEvent::RoundComplete(summary));
        }
        self.emit(EngineEvent::Stopped);
    }

    fn handle_book(&self, book: OrderbookSnapshot) {
        let now = Utc::now();
        let ask = book.best_ask_price();
        if ask <= 0.0 {
            // An empty ladder is an ordinary missing update.
            return;
        }

        let (events, auto_execute) = {
            let mut guard = lock(&self.inner.tracker);
            let Some(tracker) = guard.as_mut() else {
                return;
            };
            let Some(side) = tracker.market().side_of(&book.token_id) else {
                return;
            };
            let events = tracker.on_best_ask(side, ask, now);
            (events, tracker.config().auto_execute)
        };

        for event in events {
            match event {
                TrackerEvent::NewRound {
                    round_id,
                    price_to_beat,
                    up_open,
                    down_open,
                    start_time,
                    end_time,
                } => self.emit(EngineEvent::NewRound {
                    round_id,
                    price_to_beat,
                    up_open,
                    down_open,
                    start_time,
                    end_time,
                }),
                TrackerEvent::RoundExpired(summary) => {
                    self.emit(EngineEvent::RoundComplete(summary))
                }
                TrackerEvent::Leg1(signal) => {
                    self.emit(EngineEvent::Signal(Signal::Leg1(signal.clone())));
                    if auto_execute && self.ready_for_execution() {
                        let engine = self.clone();
                        tokio::spawn(async move {
                            engine.execute_leg1(&signal).await;
                        });
                    }
                }
                TrackerEvent::Leg2(signal) => {
                    self.emit(EngineEvent::Signal(Signal::Leg2(signal.clone())));
                    if auto_execute && self.ready_for_execution() {
                        let engine = self.clone();
                        tokio::spawn(async move {
                            engine.execute_leg2(&signal).await;
                        });
                    }
                }
            }
        }
    }

    fn handle_oracle(&self, price: OraclePrice) {
        let now = Utc::now();
        let update = {
            let mut guard = lock(&self.inner.tracker);
            let Some(tracker) = guard.as_mut() else {
                return;
            };
            let underlying = tracker.market().underlying;
            tracker
                .on_oracle(&price.symbol, price.price, now)
                .map(|u| (underlying, u))
        };

        if let Some((underlying, update)) = update {
            self.emit(EngineEvent::PriceUpdate {
                underlying,
                value: update.value,
                price_to_beat: update.price_to_beat,
                change_percent: update.change_percent,
            });
        }
    }

    fn ready_for_execution(&self) -> bool {
        if self.inner.is_executing.load(Ordering::SeqCst) {
            return false;
        }
        lock(&self.inner.tracker)
            .as_ref()
            .map(|t| t.cooldown_elapsed(Utc::now()))
            .unwrap_or(false)
    }

    fn gate_execution(
        &self,
        leg: &'static str,
        round_id: &str,
        started: Instant,
    ) -> Result<ExecutingGuard<'_>, ExecutionReport> {
        let fail = |error: &str| ExecutionReport {
            success: false,
            leg,
            round_id: round_id.to_string(),
            side: None,
            price: 0.0,
            shares: 0.0,
            elapsed_ms: started.elapsed().as_millis() as i64,
            order_id: None,
            error: Some(error.to_string()),
        };

        if !self.is_active() {
            return Err(fail("engine is not active"));
        }
        if self
            .inner
            .is_executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(fail("another execution is in flight"));
        }
        let guard = ExecutingGuard(&self.inner.is_executing);
        let cooled = lock(&self.inner.tracker)
            .as_ref()
            .map(|t| t.cooldown_elapsed(Utc::now()))
            .unwrap_or(false);
        if !cooled {
            return Err(fail("execution cooldown active"));
        }
        Ok(guard)
    }

    /// Buy the dipped side. Manual endpoint; also used by auto-execution.
    pub async fn execute_leg1(&self, signal: &Leg1Signal) -> ExecutionReport {
        let started = Instant::now();
        let guard = match self.gate_execution("leg1", &signal.round_id, started) {
            Ok(guard) => guard,
            Err(report) => {
                self.emit(EngineEvent::Execution(report.clone()));
                return report;
            }
        };

        let request = {
            let tracker_guard = lock(&self.inner.tracker);
            let Some(tracker) = tracker_guard.as_ref() else {
                drop(guard);
                let report = ExecutionReport {
                    success: false,
                    leg: "leg1",
                    round_id: signal.round_id.clone(),
                    side: Some(signal.side),
                    price: 0.0,
                    shares: 0.0,
                    elapsed_ms: started.elapsed().as_millis() as i64,
                    order_id: None,
                    error: Some("engine has no market".to_string()),
                };
                self.emit(EngineEvent::Execution(report.clone()));
                return report;
            };
            let shares = tracker.config().shares;
            MarketOrderRequest {
                token_id: tracker.market().token_id(signal.side).to_string(),
                side: OrderSide::Buy,
                shares,
                limit_price: signal.target_price,
                quote_amount: round_to_cents(shares * signal.target_price),
                client_order_id: format!("{}-leg1", signal.round_id),
            }
        };

        let result = self.inner.execution.market_order(&request).await;
        let now = Utc::now();

        let report = {
            let mut tracker_guard = lock(&self.inner.tracker);
            let applied = match tracker_guard.as_mut() {
                Some(tracker) if self.is_active() && result.success => tracker
                    .apply_leg1_fill(signal, now)
                    .map(|fill| {
                        tracker.mark_execution(now);
                        fill
                    })
                    .map_err(|e| e.to_string()),
                Some(_) if !result.success => Err(result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "order rejected".to_string())),
                _ => Err("engine stopped before fill applied".to_string()),
            };

            match applied {
                Ok(fill) => ExecutionReport {
                    success: true,
                    leg: "leg1",
                    round_id: signal.round_id.clone(),
                    side: Some(fill.side),
                    price: fill.price,
                    shares: fill.shares,
                    elapsed_ms: started.elapsed().as_millis() as i64,
                    order_id: result.order_id.clone(),
                    error: None,
                },
                Err(error) => ExecutionReport {
                    success: false,
                    leg: "leg1",
                    round_id: signal.round_id.clone(),
                    side: Some(signal.side),
                    price: 0.0,
                    shares: 0.0,
                    elapsed_ms: started.elapsed().as_millis() as i64,
                    order_id: result.order_id.clone(),
                    error: Some(error),
                },
            }
        };

        drop(guard);
        self.emit(EngineEvent::Execution(report.clone()));
        report
    }

    /// Buy the hedge side, closing out the round. On success the round
    /// completes and, when configured, the pair is merged back into quote.
    pub async fn execute_leg2(&self, signal: &Leg2Signal) -> ExecutionReport {
        let started = Instant::now();
        let guard = match self.gate_execution("leg2", &signal.round_id, started) {
            Ok(guard) => guard,
            Err(report) => {
                self.emit(EngineEvent::Execution(report.clone()));
                return report;
            }
        };

        let request = {
            let tracker_guard = lock(&self.inner.tracker);
            let Some(tracker) = tracker_guard.as_ref() else {
                drop(guard);
                let report = ExecutionReport {
                    success: false,
                    leg: "leg2",
                    round_id: signal.round_id.clone(),
                    side: Some(signal.side),
                    price: 0.0,
                    shares: 0.0,
                    elapsed_ms: started.elapsed().as_millis() as i64,
                    order_id: None,
                    error: Some("engine has no market".to_string()),
                };
                self.emit(EngineEvent::Execution(report.clone()));
                return report;
            };
            let shares = tracker.config().shares;
            MarketOrderRequest {
                token_id: tracker.market().token_id(signal.side).to_string(),
                side: OrderSide::Buy,
                shares,
                limit_price: signal.target_price,
                quote_amount: round_to_cents(shares * signal.target_price),
                client_order_id: format!("{}-leg2", signal.round_id),
            }
        };

        let result = self.inner.execution.market_order(&request).await;
        let now = Utc::now();

        let (report, summary) = {
            let mut tracker_guard = lock(&self.inner.tracker);
            let applied = match tracker_guard.as_mut() {
                Some(tracker) if self.is_active() && result.success => tracker
                    .apply_leg2_fill(signal, now)
                    .map(|summary| {
                        tracker.mark_execution(now);
                        summary
                    })
                    .map_err(|e| e.to_string()),
                Some(_) if !result.success => Err(result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "order rejected".to_string())),
                _ => Err("engine stopped before fill applied".to_string()),
            };

            match applied {
                Ok(summary) => {
                    let fill = summary.leg2.clone();
                    let report = ExecutionReport {
                        success: true,
                        leg: "leg2",
                        round_id: signal.round_id.clone(),
                        side: Some(signal.side),
                        price: fill.as_ref().map(|f| f.price).unwrap_or(0.0),
                        shares: fill.as_ref().map(|f| f.shares).unwrap_or(0.0),
                        elapsed_ms: started.elapsed().as_millis() as i64,
                        order_id: result.order_id.clone(),
                        error: None,
                    };
                    (report, Some(summary))
                }
                Err(error) => {
                    let report = ExecutionReport {
                        success: false,
                        leg: "leg2",
                        round_id: signal.round_id.clone(),
                        side: Some(signal.side),
                        price: 0.0,
                        shares: 0.0,
                        elapsed_ms: started.elapsed().as_millis() as i64,
                        order_id: result.order_id.clone(),
                        error: Some(error),
                    };
                    (report, None)
                }
            }
        };

        drop(guard);
        self.emit(EngineEvent::Execution(report.clone()));

        if let Some(mut summary) = summary {
            let merge_target = {
                let tracker_guard = lock(&self.inner.tracker);
                tracker_guard.as_ref().and_then(|t| {
                    t.config()
                        .auto_merge
                        .then(|| (t.market().condition_id.clone(), t.config().shares))
                })
            };

            if let Some((condition_id, shares)) = merge_target {
                let merge = self.inner.settlement.merge(&condition_id, shares).await;
                if merge.success {
                    if let Some(tracker) = lock(&self.inner.tracker).as_mut() {
                        tracker.mark_merged(&summary.round_id);
                    }
                    summary.merged = true;
                    summary.merge_tx_hash = merge.tx_hash;
                } else {
                    self.emit(EngineEvent::Error {
                        code: "EXECUTION_FAILED".to_string(),
                        message: merge
                            .error
                            .unwrap_or_else(|| "merge rejected".to_string()),
                        retryable: true,
                    });
                }
            }

            self.emit(EngineEvent::RoundComplete(summary));
        }

        report
    }

    /// Manually merge the currently-held pair back into quote.
    pub async fn merge_position(&self) -> Result<MergeResult, EngineError> {
        let (condition_id, shares, round_id) = {
            let tracker_guard = lock(&self.inner.tracker);
            let tracker = tracker_guard.as_ref().ok_or(EngineError::NotActive)?;
            let round = tracker
                .round()
                .ok_or_else(|| EngineError::Validation("no active round".to_string()))?;
            (
                tracker.market().condition_id.clone(),
                tracker.config().shares,
                round.id.clone(),
            )
        };

        let result = self.inner.settlement.merge(&condition_id, shares).await;
        if result.success {
            if let Some(tracker) = lock(&self.inner.tracker).as_mut() {
                tracker.mark_merged(&round_id);
            }
        }
        Ok(result)
    }
}

/// Quote amounts are rounded to the venue's cent tick.
fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

async fn run_delivery(
    engine: DipArbEngine,
    mut book_rx: mpsc::UnboundedReceiver<OrderbookSnapshot>,
    mut oracle_rx: mpsc::UnboundedReceiver<OraclePrice>,
) {
    let mut books_open = true;
    let mut oracle_open = true;

    while engine.is_active() && (books_open || oracle_open) {
        tokio::select! {
            maybe_book = book_rx.recv(), if books_open => {
                match maybe_book {
                    Some(book) => engine.handle_book(book),
                    None => books_open = false,
                }
            }
            maybe_price = oracle_rx.recv(), if oracle_open => {
                match maybe_price {
                    Some(price) => engine.handle_oracle(price),
                    None => oracle_open = false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_amounts_round_to_cents() {
        assert!((round_to_cents(7.1399999) - 7.14).abs() < 1e-12);
        assert!((round_to_cents(20.0 * 0.357) - 7.14).abs() < 1e-12);
        assert!((round_to_cents(0.004) - 0.0).abs() < 1e-12);
    }
}
