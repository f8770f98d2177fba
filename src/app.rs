use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::clob::ClobClient;
use crate::client::realtime::{RealtimeClient, SubscriptionHandle};
use crate::engine::{DipArbEngine, EngineConfig, EngineEvent, Signal};
use crate::execution::settlement::{LiveSettlement, PaperSettlement, SettlementBackend};
use crate::execution::ExecutionBackend;
use crate::markets::{scan_crypto_short_term_markets, Market, MarketQuery, SortBy};
use crate::monitoring::{dashboard, metrics::METRICS};
use crate::orderbook::OrderbookService;
use crate::rotation::{RotationConfig, RotationSupervisor};
use crate::storage::{
    create_pg_pool,
    recorder::{RoundRecorder, TickRecorder},
};
use crate::types::{AppConfig, ExecutionMode};

/// Mirrors the actively monitored market's ask stream into TimescaleDB so
/// replays have data to chew on. Retargeted on every rotation.
struct TickFeed {
    realtime: Arc<RealtimeClient>,
    recorder: Arc<TickRecorder>,
    sub: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl TickFeed {
    fn new(realtime: Arc<RealtimeClient>, recorder: Arc<TickRecorder>) -> Self {
        Self {
            realtime,
            recorder,
            sub: None,
            task: None,
        }
    }

    fn retarget(&mut self, market: &Market) {
        self.shutdown();

        let tokens = [market.up_token_id.clone(), market.down_token_id.clone()];
        let (sub, mut rx) = self.realtime.subscribe_markets(&tokens);
        self.sub = Some(sub);

        let recorder = Arc::clone(&self.recorder);
        let market = market.clone();
        self.task = Some(tokio::spawn(async move {
            let mut up_ask = 0.0f64;
            let mut down_ask = 0.0f64;

            while let Some(book) = rx.recv().await {
                METRICS.record_book_update();
                let Some(side) = market.side_of(&book.token_id) else {
                    continue;
                };
                let ask = book.best_ask_price();
                if ask <= 0.0 {
                    continue;
                }
                match side {
                    crate::markets::Side::Up => up_ask = ask,
                    crate::markets::Side::Down => down_ask = ask,
                }
                if up_ask > 0.0 && down_ask > 0.0 {
                    if let Err(err) = recorder
                        .record_tick(book.timestamp, &market.slug, up_ask, down_ask)
                        .await
                    {
                        warn!(
                            target: "storage",
                            error = %err,
                            market = %market.slug,
                            "failed to record ask tick"
                        );
                    }
                }
            }
        }));
    }

    fn shutdown(&mut self) {
        if let Some(sub) = self.sub.take() {
            sub.unsubscribe();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Entrypoint used by `main.rs` to start the trading bot.
///
/// Wires the realtime transport, dip-arbitrage engine, rotation supervisor,
/// storage and monitoring into one event loop, then drains engine events
/// until interrupted.
pub async fn run_bot(cfg: AppConfig) -> anyhow::Result<()> {
    info!(target: "bot", "run_bot starting");

    // Periodic metrics snapshots plus the TCP health endpoint.
    dashboard::spawn_dashboard_task(Duration::from_secs(10));
    let health_addr = cfg.monitoring.health_addr.clone();
    let max_staleness = Duration::from_secs(cfg.monitoring.max_staleness_secs);
    info!(target: "bot", addr = %health_addr, "serving health endpoint");
    tokio::spawn(async move {
        if let Err(err) = dashboard::serve_health(&health_addr, max_staleness).await {
            warn!(target: "bot", error = %err, "health endpoint exited");
        }
    });

    // Short timeout so startup fails fast when the metadata API is down.
    let http = reqwest::Client::builder()
        .user_agent("polymarket-dip-bot/0.1")
        .timeout(Duration::from_secs(15))
        .build()?;

    let clob = Arc::new(ClobClient::new(&cfg.api)?);
    let orderbook = Arc::new(OrderbookService::new(Arc::clone(&clob)));
    let execution = Arc::new(ExecutionBackend::from_config(&cfg, Arc::clone(&clob))?);
    let settlement = Arc::new(match cfg.execution.mode {
        ExecutionMode::Paper => SettlementBackend::Paper(PaperSettlement::new()),
        ExecutionMode::Live => SettlementBackend::Live(LiveSettlement::new(
            Arc::clone(&clob),
            http.clone(),
            cfg.api.gamma_url.clone(),
        )),
    });

    info!(target: "bot", "connecting to Postgres");
    let pool = create_pg_pool(&cfg.postgres).await?;
    info!(target: "bot", "Postgres connected");
    let tick_recorder = Arc::new(TickRecorder::new(pool.clone()));
    let round_recorder = RoundRecorder::new(pool.clone());

    let rotation_config =
        RotationConfig::try_from(&cfg.rotation).map_err(|e| anyhow::anyhow!(e))?;

    info!(target: "bot", ws_url = %cfg.api.ws_url, "connecting realtime transport");
    let realtime = Arc::new(RealtimeClient::connect(cfg.api.ws_url.clone()));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let engine = DipArbEngine::new(
        EngineConfig::from(&cfg.bot),
        Arc::clone(&execution),
        Arc::clone(&settlement),
        Arc::clone(&realtime),
        events_tx.clone(),
    );
    let supervisor = RotationSupervisor::new(
        engine.clone(),
        Arc::clone(&execution),
        Arc::clone(&settlement),
        Some(Arc::clone(&orderbook)),
        http.clone(),
        cfg.api.gamma_url.clone(),
        events_tx,
    );

    // Find the round currently trading and latch on.
    let query = MarketQuery {
        underlyings: rotation_config.underlyings.clone(),
        durations: vec![rotation_config.duration],
        min_minutes_until_end: 1,
        max_minutes_until_end: 30,
        limit: 10,
        sort_by: SortBy::EndDate,
        exclude_condition_ids: Vec::new(),
    };
    let first = scan_crypto_short_term_markets(&http, &cfg.api.gamma_url, &query)
        .await?
        .into_iter()
        .next()
        .map(|d| d.market)
        .context("no tradeable market found for the configured underlyings")?;

    info!(target: "bot", market = %first.slug, end = %first.end_time, "starting engine");
    engine.start(first.clone()).await?;
    supervisor
        .enable_rotation(rotation_config)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut tick_feed = TickFeed::new(Arc::clone(&realtime), Arc::clone(&tick_recorder));
    tick_feed.retarget(&first);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "bot", "interrupt received; shutting down");
                break;
            }
            maybe_event = events_rx.recv() => {
                let Some(event) = maybe_event else {
                    warn!(target: "bot", "event channel closed; exiting run loop");
                    break;
                };
                handle_event(event, &engine, &round_recorder, &mut tick_feed).await;
            }
        }
    }

    supervisor.disable_rotation();
    engine.stop().await;
    tick_feed.shutdown();

    Ok(())
}

async fn handle_event(
    event: EngineEvent,
    engine: &DipArbEngine,
    round_recorder: &RoundRecorder,
    tick_feed: &mut TickFeed,
) {
    match event {
        EngineEvent::Started { market } => {
            info!(target: "bot", market = %market.slug, end = %market.end_time, "engine started");
        }
        EngineEvent::Stopped => {
            info!(target: "bot", "engine stopped");
        }
        EngineEvent::NewRound {
            round_id,
            price_to_beat,
            up_open,
            down_open,
            ..
        } => {
            info!(
                target: "bot",
                round = %round_id,
                price_to_beat,
                up_open,
                down_open,
                "new round"
            );
        }
        EngineEvent::Signal(signal) => {
            METRICS.record_signal(signal.leg_label());
            match &signal {
                Signal::Leg1(s) => info!(
                    target: "bot",
                    round = %s.round_id,
                    side = %s.side,
                    source = ?s.source,
                    price = s.current_price,
                    drop = s.drop_percent,
                    target = s.target_price,
                    est_profit_rate = s.estimated_profit_rate,
                    "leg1 signal"
                ),
                Signal::Leg2(s) => info!(
                    target: "bot",
                    round = %s.round_id,
                    side = %s.side,
                    price = s.current_price,
                    total_cost = s.total_cost,
                    profit_rate = s.expected_profit_rate,
                    "leg2 signal"
                ),
            }
        }
        EngineEvent::Execution(report) => {
            if report.success {
                info!(
                    target: "bot",
                    round = %report.round_id,
                    leg = report.leg,
                    price = report.price,
                    shares = report.shares,
                    elapsed_ms = report.elapsed_ms,
                    "execution filled"
                );
            } else {
                warn!(
                    target: "bot",
                    round = %report.round_id,
                    leg = report.leg,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "execution failed"
                );
            }
        }
        EngineEvent::RoundComplete(summary) => {
            let status = match summary.status {
                crate::engine::RoundStatus::Completed => "completed",
                crate::engine::RoundStatus::Expired => "expired",
                crate::engine::RoundStatus::Partial => "partial",
            };
            METRICS.record_round_complete(status);
            info!(
                target: "bot",
                round = %summary.round_id,
                status,
                total_cost = summary.total_cost,
                profit = summary.profit,
                merged = summary.merged,
                "round complete"
            );
            let slug = engine
                .market()
                .map(|m| m.slug)
                .unwrap_or_else(|| "unknown".to_string());
            if let Err(err) = round_recorder
                .record_round(chrono::Utc::now(), &slug, &summary)
                .await
            {
                warn!(target: "storage", error = %err, round = %summary.round_id, "failed to record round");
            }
        }
        EngineEvent::PriceUpdate {
            underlying,
            value,
            price_to_beat,
            change_percent,
        } => {
            debug!(
                target: "bot",
                underlying = %underlying,
                value,
                price_to_beat,
                change_percent,
                "oracle price"
            );
        }
        EngineEvent::Rotate {
            previous_market,
            new_market,
            reason,
            ..
        } => {
            METRICS.record_rotation();
            info!(
                target: "bot",
                previous = previous_market.as_deref().unwrap_or("none"),
                next = %new_market,
                reason = ?reason,
                "rotated to next market"
            );
            if let Some(market) = engine.market() {
                tick_feed.retarget(&market);
            }
        }
        EngineEvent::Settled {
            success,
            strategy,
            amount_received,
            tx_hash,
            error,
        } => {
            METRICS.record_settlement();
            if success {
                info!(
                    target: "bot",
                    strategy = ?strategy,
                    amount = amount_received.unwrap_or(0.0),
                    tx = tx_hash.as_deref().unwrap_or(""),
                    "position settled"
                );
            } else {
                warn!(
                    target: "bot",
                    strategy = ?strategy,
                    error = error.as_deref().unwrap_or("unknown"),
                    "settlement failed"
                );
            }
        }
        EngineEvent::Error {
            code,
            message,
            retryable,
        } => {
            warn!(target: "bot", code = %code, retryable, "{message}");
        }
    }
}
