use serde::Serialize;
use tracing::{info, warn};

use crate::engine::EngineConfig;
use crate::storage::{create_pg_pool, models::AskTickRow};

use super::{market_from_slug, ReplayConfig};

/// Execute a replay by loading recorded ask ticks from TimescaleDB and
/// running them through the round state machine, one market at a time.
pub async fn run_replay(cfg: ReplayConfig) -> anyhow::Result<()> {
    let pool = create_pg_pool(&cfg.postgres).await?;
    let engine_config = EngineConfig::from(&cfg.bot);

    let mut total_trades = 0usize;
    let mut total_profit = 0.0f64;

    for range in &cfg.markets {
        let Some(market) = market_from_slug(&range.slug) else {
            warn!(target: "replay", slug = %range.slug, "unrecognized slug; skipping");
            continue;
        };

        let ticks: Vec<AskTickRow> = sqlx::query_as(
            "SELECT ts, market_slug, up_ask, down_ask \
             FROM ask_ticks \
             WHERE market_slug = $1 AND ts >= $2 AND ts <= $3 \
             ORDER BY ts ASC",
        )
        .bind(&range.slug)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&pool)
        .await?;

        if ticks.is_empty() {
            warn!(target: "replay", slug = %range.slug, "no recorded ticks in range");
            continue;
        }

        let result = super::run_replay_on_ticks(&market, &engine_config, &ticks);
        log_market_summary(&range.slug, &result);

        total_trades += result.trades.len();
        total_profit += result.total_profit;
    }

    info!(
        target: "replay",
        event = "replay_summary",
        markets = cfg.markets.len(),
        trades = total_trades,
        total_profit,
        "replay finished"
    );

    Ok(())
}

#[derive(Serialize)]
struct MarketReplaySummary<'a> {
    event: &'a str,
    slug: &'a str,
    ticks: usize,
    rounds: u64,
    expired: u64,
    signals: u64,
    trades: usize,
    profit: f64,
}

fn log_market_summary(slug: &str, result: &super::ReplayResult) {
    let summary = MarketReplaySummary {
        event: "market_replay",
        slug,
        ticks: result.ticks_processed,
        rounds: result.rounds_monitored,
        expired: result.rounds_expired,
        signals: result.signals_detected,
        trades: result.trades.len(),
        profit: result.total_profit,
    };
    info!(
        target: "replay",
        summary = serde_json::to_string(&summary).unwrap_or_default().as_str()
    );
}
