use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::gamma::{self, GammaMarket};
use crate::client::ClientResult;

use super::{build_slug, slot_start, Market, MarketDuration, Underlying};

/// Slugs fetched concurrently per batch.
const FETCH_BATCH: usize = 10;
const SLUG_FETCH_RETRIES: u32 = 3;
const SLUG_RETRY_BACKOFF: StdDuration = StdDuration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Soonest-ending first.
    EndDate,
    /// 24h volume, descending.
    Volume,
    /// Liquidity, descending.
    Liquidity,
}

/// Query over upcoming short-term UP/DOWN markets.
#[derive(Clone, Debug)]
pub struct MarketQuery {
    pub underlyings: Vec<Underlying>,
    pub durations: Vec<MarketDuration>,
    pub min_minutes_until_end: i64,
    pub max_minutes_until_end: i64,
    pub limit: usize,
    pub sort_by: SortBy,
    /// Condition ids to drop from the result, e.g. the market being rotated away from.
    pub exclude_condition_ids: Vec<String>,
}

impl Default for MarketQuery {
    fn default() -> Self {
        Self {
            underlyings: vec![Underlying::Btc],
            durations: vec![MarketDuration::M15],
            min_minutes_until_end: 5,
            max_minutes_until_end: 30,
            limit: 10,
            sort_by: SortBy::EndDate,
            exclude_condition_ids: Vec::new(),
        }
    }
}

/// A tradeable market plus the venue stats used for ranking.
#[derive(Clone, Debug)]
pub struct DiscoveredMarket {
    pub market: Market,
    pub volume_24hr: f64,
    pub liquidity: f64,
}

/// Candidate slot starts whose markets could end inside the query window.
///
/// A market starting at slot `s` ends at `s + interval`, so the usable slots
/// span `[floor((minEnd - interval) / interval), ceil(maxEnd / interval)]`
/// in interval steps.
fn enumerate_slots(
    now: DateTime<Utc>,
    duration: MarketDuration,
    min_minutes_until_end: i64,
    max_minutes_until_end: i64,
) -> Vec<i64> {
    let interval = duration.interval_seconds();
    let min_end = now.timestamp() + min_minutes_until_end * 60;
    let max_end = now.timestamp() + max_minutes_until_end * 60;

    let first = slot_start(min_end - interval, duration);
    let last = ((max_end + interval - 1).div_euclid(interval)) * interval;

    let mut slots = Vec::new();
    let mut slot = first;
    while slot <= last {
        slots.push(slot);
        slot += interval;
    }
    slots
}

async fn fetch_slug_with_retries(
    http: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> Option<GammaMarket> {
    let mut attempt = 0;
    loop {
        match gamma::fetch_market_by_slug(http, gamma_url, slug).await {
            Ok(found) => return found,
            Err(err) if err.retryable() && attempt < SLUG_FETCH_RETRIES => {
                attempt += 1;
                debug!(
                    target: "discovery",
                    slug,
                    attempt,
                    error = %err,
                    "transient failure fetching slug; retrying"
                );
                sleep(SLUG_RETRY_BACKOFF).await;
            }
            Err(err) => {
                warn!(target: "discovery", slug, error = %err, "skipping slug");
                return None;
            }
        }
    }
}

fn into_market(
    found: GammaMarket,
    underlying: Underlying,
    duration: MarketDuration,
    slug: String,
) -> Option<DiscoveredMarket> {
    let end_time = found.end_date?;
    let up_token_id = found.up_token_id?;
    let down_token_id = found.down_token_id?;

    Some(DiscoveredMarket {
        market: Market {
            condition_id: found.condition_id,
            slug,
            underlying,
            duration,
            end_time,
            up_token_id,
            down_token_id,
        },
        volume_24hr: found.volume_24hr,
        liquidity: found.liquidity,
    })
}

/// Enumerate upcoming short-duration markets matching the query.
///
/// Slugs are generated from the slot grid, fetched in parallel batches,
/// filtered to live markets ending inside the window, and sorted per the
/// query. Slugs without a market, inactive markets, and malformed rows are
/// skipped.
pub async fn scan_crypto_short_term_markets(
    http: &reqwest::Client,
    gamma_url: &str,
    query: &MarketQuery,
) -> ClientResult<Vec<DiscoveredMarket>> {
    let now = Utc::now();
    let window_start = now + Duration::minutes(query.min_minutes_until_end);
    let window_end = now + Duration::minutes(query.max_minutes_until_end);

    let mut candidates: Vec<(Underlying, MarketDuration, String)> = Vec::new();
    for &duration in &query.durations {
        for slot in enumerate_slots(
            now,
            duration,
            query.min_minutes_until_end,
            query.max_minutes_until_end,
        ) {
            for &underlying in &query.underlyings {
                candidates.push((underlying, duration, build_slug(underlying, duration, slot)));
            }
        }
    }

    debug!(target: "discovery", candidates = candidates.len(), "scanning slug grid");

    let mut found: Vec<DiscoveredMarket> = stream::iter(candidates)
        .map(|(underlying, duration, slug)| async move {
            let market = fetch_slug_with_retries(http, gamma_url, &slug).await?;
            into_market(market.clone(), underlying, duration, slug)
                .filter(|_| market.active && !market.closed)
        })
        .buffer_unordered(FETCH_BATCH)
        .filter_map(|item| async move { item })
        .collect()
        .await;

    found.retain(|d| {
        d.market.end_time >= window_start
            && d.market.end_time <= window_end
            && !query
                .exclude_condition_ids
                .iter()
                .any(|id| id == &d.market.condition_id)
    });

    match query.sort_by {
        SortBy::EndDate => found.sort_by_key(|d| d.market.end_time),
        SortBy::Volume => found.sort_by(|a, b| b.volume_24hr.total_cmp(&a.volume_24hr)),
        SortBy::Liquidity => found.sort_by(|a, b| b.liquidity.total_cmp(&a.liquidity)),
    }
    found.truncate(query.limit);

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slot_grid_covers_the_query_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let slots = enumerate_slots(now, MarketDuration::M15, 5, 30);

        // Every slot is interval-aligned and the grid brackets the window.
        assert!(!slots.is_empty());
        for slot in &slots {
            assert_eq!(slot % 900, 0);
        }
        let min_end = now.timestamp() + 5 * 60;
        let max_end = now.timestamp() + 30 * 60;
        assert!(slots.first().unwrap() + 900 <= min_end + 900);
        assert!(*slots.last().unwrap() >= max_end - 900);
    }

    #[test]
    fn slot_grid_5m_is_denser_than_15m() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let m5 = enumerate_slots(now, MarketDuration::M5, 5, 30);
        let m15 = enumerate_slots(now, MarketDuration::M15, 5, 30);
        assert!(m5.len() > m15.len());
    }
}
