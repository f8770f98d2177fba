use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use polymarket_dip_bot::client::realtime::RealtimeClient;
use polymarket_dip_bot::engine::{
    DipArbEngine, EngineConfig, EngineEvent, Leg1Signal, SignalSource,
};
use polymarket_dip_bot::execution::settlement::{PaperSettlement, SettlementBackend};
use polymarket_dip_bot::execution::{ExecutionBackend, PaperExecutor};
use polymarket_dip_bot::markets::{Market, MarketDuration, Side, Underlying};
use polymarket_dip_bot::rotation::{RotationConfig, RotationSupervisor, SettleStrategy};

fn market() -> Market {
    Market {
        condition_id: "0xc0ffee".to_string(),
        slug: "btc-updown-15m-1700000000".to_string(),
        underlying: Underlying::Btc,
        duration: MarketDuration::M15,
        end_time: Utc::now() + Duration::minutes(15),
        up_token_id: "up-token".to_string(),
        down_token_id: "down-token".to_string(),
    }
}

fn build_engine() -> (DipArbEngine, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    // Transport pointing nowhere; these tests never wait for a handshake.
    let realtime = Arc::new(RealtimeClient::connect("ws://127.0.0.1:1/ws"));
    let engine = DipArbEngine::new(
        EngineConfig::default(),
        Arc::new(ExecutionBackend::Paper(PaperExecutor::new())),
        Arc::new(SettlementBackend::Paper(PaperSettlement::new())),
        realtime,
        tx,
    );
    (engine, rx)
}

fn build_supervisor(engine: &DipArbEngine) -> RotationSupervisor {
    let (tx, _rx) = mpsc::unbounded_channel();
    RotationSupervisor::new(
        engine.clone(),
        Arc::new(ExecutionBackend::Paper(PaperExecutor::new())),
        Arc::new(SettlementBackend::Paper(PaperSettlement::new())),
        None,
        reqwest::Client::new(),
        "http://127.0.0.1:1".to_string(),
        tx,
    )
}

fn rotation_config() -> RotationConfig {
    RotationConfig {
        underlyings: vec![Underlying::Btc],
        duration: MarketDuration::M15,
        preload_minutes: 2,
        auto_settle: true,
        settle_strategy: SettleStrategy::Redeem,
        redeem_wait_minutes: 5,
        redeem_retry_interval_secs: 30,
    }
}

#[tokio::test]
async fn configure_is_idempotent() {
    let (engine, _rx) = build_engine();

    let mut config = EngineConfig::default();
    config.shares = 10.0;
    config.sum_target = 0.93;

    engine.configure(config.clone());
    let first = engine.statistics();
    engine.configure(config);
    let second = engine.statistics();

    assert_eq!(first.rounds_monitored, second.rounds_monitored);
    assert_eq!(first.signals_detected, second.signals_detected);
    assert_eq!(first.leg1_fills, second.leg1_fills);
    assert!((first.total_spent - second.total_spent).abs() < f64::EPSILON);
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let (engine, mut rx) = build_engine();

    engine.stop().await;
    engine.stop().await;

    assert!(!engine.is_active());
    assert!(rx.try_recv().is_err(), "no events expected from idle stops");
}

#[tokio::test]
async fn start_rejects_markets_missing_a_token() {
    let (engine, _rx) = build_engine();

    let mut bad = market();
    bad.down_token_id.clear();

    let err = engine.start(bad).await.expect_err("start should fail");
    assert_eq!(err.code(), "VALIDATION");
    assert!(!engine.is_active());
}

#[tokio::test]
async fn manual_execution_requires_an_active_engine() {
    let (engine, mut rx) = build_engine();

    let signal = Leg1Signal {
        round_id: "btc-updown-15m-1700000000-r1".to_string(),
        side: Side::Up,
        source: SignalSource::Dip,
        current_price: 0.35,
        open_price: 0.50,
        drop_percent: 0.30,
        opposite_ask: 0.58,
        target_price: 0.357,
        estimated_total_cost: 0.937,
        estimated_profit_rate: (1.0 - 0.937) / 0.937,
        detected_at: Utc::now(),
    };

    let report = engine.execute_leg1(&signal).await;
    assert!(!report.success);
    assert_eq!(report.leg, "leg1");
    assert!(report.error.unwrap().contains("not active"));

    // The failed attempt is still surfaced on the event stream.
    match rx.try_recv() {
        Ok(EngineEvent::Execution(r)) => assert!(!r.success),
        other => panic!("expected an execution event, got {other:?}"),
    }
}

#[tokio::test]
async fn statistics_start_at_zero() {
    let (engine, _rx) = build_engine();
    let stats = engine.statistics();

    assert_eq!(stats.rounds_monitored, 0);
    assert_eq!(stats.rounds_completed, 0);
    assert_eq!(stats.signals_detected, 0);
    assert!(stats.rounds_successful <= stats.rounds_completed);
    assert!(stats.rounds_completed <= stats.rounds_monitored);
    assert!(stats.signals_detected >= stats.leg1_fills + stats.leg2_fills);
}

#[tokio::test]
async fn rotation_enable_disable_enable_restarts_once() {
    let (engine, _rx) = build_engine();
    let supervisor = build_supervisor(&engine);

    supervisor
        .enable_rotation(rotation_config())
        .expect("first enable should succeed");
    assert!(
        supervisor.enable_rotation(rotation_config()).is_err(),
        "double enable must be rejected"
    );

    supervisor.disable_rotation();
    supervisor
        .enable_rotation(rotation_config())
        .expect("enable after disable should succeed");
    supervisor.disable_rotation();
}

#[tokio::test]
async fn pending_redemptions_start_empty_and_survive_disable() {
    let (engine, _rx) = build_engine();
    let supervisor = build_supervisor(&engine);

    supervisor
        .enable_rotation(rotation_config())
        .expect("enable should succeed");
    assert!(supervisor.pending_redemptions().is_empty());

    supervisor.disable_rotation();
    assert!(supervisor.pending_redemptions().is_empty());
}
