use chrono::{DateTime, Utc};
use sqlx::query;

use crate::engine::RoundSummary;
use crate::storage::PgPool;

/// Records best-ask pairs into TimescaleDB for later replay.
///
/// The expected schema (created via migrations) is:
/// ```sql
/// CREATE TABLE IF NOT EXISTS ask_ticks (
///   ts           TIMESTAMPTZ NOT NULL,
///   market_slug  TEXT        NOT NULL,
///   up_ask       DOUBLE PRECISION NOT NULL,
///   down_ask     DOUBLE PRECISION NOT NULL
/// );
/// ```
pub struct TickRecorder {
    pool: PgPool,
}

impl TickRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record_tick(
        &self,
        ts: DateTime<Utc>,
        market_slug: &str,
        up_ask: f64,
        down_ask: f64,
    ) -> anyhow::Result<()> {
        query(
            "INSERT INTO ask_ticks (ts, market_slug, up_ask, down_ask) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(ts)
        .bind(market_slug)
        .bind(up_ask)
        .bind(down_ask)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Records finished rounds and their fills.
///
/// The expected schema (created via migrations) is:
/// ```sql
/// CREATE TABLE IF NOT EXISTS round_results (
///   ts            TIMESTAMPTZ NOT NULL,
///   market_slug   TEXT        NOT NULL,
///   round_id      TEXT        NOT NULL,
///   status        TEXT        NOT NULL,
///   leg1_side     TEXT,
///   leg1_price    DOUBLE PRECISION,
///   leg2_side     TEXT,
///   leg2_price    DOUBLE PRECISION,
///   shares        DOUBLE PRECISION NOT NULL,
///   total_cost    DOUBLE PRECISION NOT NULL,
///   profit        DOUBLE PRECISION NOT NULL,
///   merged        BOOLEAN NOT NULL,
///   merge_tx_hash TEXT
/// );
/// ```
pub struct RoundRecorder {
    pool: PgPool,
}

impl RoundRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record_round(
        &self,
        ts: DateTime<Utc>,
        market_slug: &str,
        summary: &RoundSummary,
    ) -> anyhow::Result<()> {
        let status = match summary.status {
            crate::engine::RoundStatus::Completed => "completed",
            crate::engine::RoundStatus::Expired => "expired",
            crate::engine::RoundStatus::Partial => "partial",
        };
        let shares = summary
            .leg1
            .as_ref()
            .or(summary.leg2.as_ref())
            .map(|f| f.shares)
            .unwrap_or(0.0);

        query(
            "INSERT INTO round_results \
             (ts, market_slug, round_id, status, leg1_side, leg1_price, \
              leg2_side, leg2_price, shares, total_cost, profit, merged, merge_tx_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(ts)
        .bind(market_slug)
        .bind(&summary.round_id)
        .bind(status)
        .bind(summary.leg1.as_ref().map(|f| f.side.label()))
        .bind(summary.leg1.as_ref().map(|f| f.price))
        .bind(summary.leg2.as_ref().map(|f| f.side.label()))
        .bind(summary.leg2.as_ref().map(|f| f.price))
        .bind(shares)
        .bind(summary.total_cost)
        .bind(summary.profit)
        .bind(summary.merged)
        .bind(summary.merge_tx_hash.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
