//! Gamma metadata API client for UP/DOWN market discovery and resolution.
//!
//! Short-term markets use dynamic slugs: `{coin}-updown-{5m|15m}-{slot_start_unix}`
//! where the slot start is the wall clock floored to the round interval.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::markets::Side;

use super::{ClientError, ClientResult};

/// Numeric fields the metadata API serves inconsistently as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

impl NumOrStr {
    fn as_f64(&self) -> f64 {
        match self {
            NumOrStr::Num(n) => *n,
            NumOrStr::Str(s) => s.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GammaToken {
    token_id: String,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    winner: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GammaMarketRow {
    #[serde(default, rename = "conditionId")]
    condition_id: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, rename = "endDate")]
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(default, rename = "volume24hr")]
    volume_24hr: Option<NumOrStr>,
    #[serde(default)]
    liquidity: Option<NumOrStr>,
    #[serde(default, rename = "clobTokenIds")]
    clob_token_ids: Option<Vec<String>>,
    #[serde(default)]
    tokens: Option<Vec<GammaToken>>,
    #[serde(default, rename = "outcomePrices")]
    outcome_prices: Option<Vec<String>>,
}

/// Normalized view of one metadata row.
#[derive(Clone, Debug)]
pub struct GammaMarket {
    pub condition_id: String,
    pub slug: String,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub volume_24hr: f64,
    pub liquidity: f64,
    pub up_token_id: Option<String>,
    pub down_token_id: Option<String>,
    /// Winning side once the oracle has resolved, if reported.
    pub winner: Option<Side>,
}

impl GammaMarketRow {
    fn normalize(self) -> Option<GammaMarket> {
        let condition_id = self.condition_id?;
        let slug = self.slug.unwrap_or_default();

        // Token ids come either as a flat pair or as labelled outcome tokens.
        // Labels are matched case-insensitively; without labels the first
        // token is UP and the second DOWN.
        let (up, down) = match (&self.clob_token_ids, &self.tokens) {
            (Some(ids), _) if ids.len() >= 2 => (Some(ids[0].clone()), Some(ids[1].clone())),
            (_, Some(tokens)) if tokens.len() >= 2 => {
                let labelled_up = tokens.iter().find(|t| {
                    t.outcome
                        .as_deref()
                        .and_then(Side::parse_outcome)
                        .map_or(false, |s| s == Side::Up)
                });
                let labelled_down = tokens.iter().find(|t| {
                    t.outcome
                        .as_deref()
                        .and_then(Side::parse_outcome)
                        .map_or(false, |s| s == Side::Down)
                });
                match (labelled_up, labelled_down) {
                    (Some(u), Some(d)) => (Some(u.token_id.clone()), Some(d.token_id.clone())),
                    _ => (
                        Some(tokens[0].token_id.clone()),
                        Some(tokens[1].token_id.clone()),
                    ),
                }
            }
            _ => (None, None),
        };

        let winner_from_tokens = self.tokens.as_ref().and_then(|tokens| {
            tokens
                .iter()
                .position(|t| t.winner == Some(true))
                .and_then(|idx| {
                    tokens[idx]
                        .outcome
                        .as_deref()
                        .and_then(Side::parse_outcome)
                        .or(match idx {
                            0 => Some(Side::Up),
                            1 => Some(Side::Down),
                            _ => None,
                        })
                })
        });

        let winner = winner_from_tokens.or_else(|| {
            self.outcome_prices
                .as_ref()
                .and_then(|prices| winner_from_outcome_prices(prices))
        });

        Some(GammaMarket {
            condition_id,
            slug,
            end_date: self.end_date,
            active: self.active.unwrap_or(false),
            closed: self.closed.unwrap_or(false),
            volume_24hr: self.volume_24hr.map(|v| v.as_f64()).unwrap_or(0.0),
            liquidity: self.liquidity.map(|v| v.as_f64()).unwrap_or(0.0),
            up_token_id: up,
            down_token_id: down,
            winner,
        })
    }
}

/// Settled outcome prices are "1"/"0" pairs; the index paying out 1 won.
fn winner_from_outcome_prices(prices: &[String]) -> Option<Side> {
    let parsed: Vec<f64> = prices.iter().filter_map(|p| p.parse().ok()).collect();
    if parsed.len() < 2 {
        return None;
    }
    if parsed[0] > 0.5 && parsed[1] < 0.5 {
        Some(Side::Up)
    } else if parsed[1] > 0.5 && parsed[0] < 0.5 {
        Some(Side::Down)
    } else {
        None
    }
}

/// Fetch a single market by slug. `Ok(None)` means the slot has no market.
pub async fn fetch_market_by_slug(
    http: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> ClientResult<Option<GammaMarket>> {
    let url = format!("{}/markets", gamma_url.trim_end_matches('/'));
    let resp = http.get(&url).query(&[("slug", slug)]).send().await?;

    if !resp.status().is_success() {
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::RateLimited(body));
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::HttpStatus { status, body });
    }

    let rows: Vec<GammaMarketRow> = resp.json().await?;
    Ok(rows.into_iter().next().and_then(GammaMarketRow::normalize))
}

/// Fetch a market by its condition id; used by the redemption ticker to poll
/// oracle resolution.
pub async fn fetch_market_by_condition_id(
    http: &reqwest::Client,
    gamma_url: &str,
    condition_id: &str,
) -> ClientResult<Option<GammaMarket>> {
    let url = format!("{}/markets", gamma_url.trim_end_matches('/'));
    let resp = http
        .get(&url)
        .query(&[("condition_ids", condition_id)])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::HttpStatus { status, body });
    }

    let rows: Vec<GammaMarketRow> = resp.json().await?;
    Ok(rows.into_iter().next().and_then(GammaMarketRow::normalize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefers_flat_token_pair() {
        let row: GammaMarketRow = serde_json::from_str(
            r#"{
                "conditionId": "0xabc",
                "slug": "btc-updown-15m-1700000000",
                "endDate": "2024-01-01T12:15:00Z",
                "active": true,
                "closed": false,
                "volume24hr": 1234.5,
                "liquidity": "777.0",
                "clobTokenIds": ["11", "22"]
            }"#,
        )
        .unwrap();

        let m = row.normalize().expect("row should normalize");
        assert_eq!(m.condition_id, "0xabc");
        assert_eq!(m.up_token_id.as_deref(), Some("11"));
        assert_eq!(m.down_token_id.as_deref(), Some("22"));
        assert!((m.liquidity - 777.0).abs() < f64::EPSILON);
        assert!(m.active);
    }

    #[test]
    fn normalize_maps_labelled_tokens_case_insensitively() {
        let row: GammaMarketRow = serde_json::from_str(
            r#"{
                "conditionId": "0xdef",
                "tokens": [
                    {"token_id": "no-token", "outcome": "NO"},
                    {"token_id": "yes-token", "outcome": "Yes"}
                ]
            }"#,
        )
        .unwrap();

        let m = row.normalize().unwrap();
        assert_eq!(m.up_token_id.as_deref(), Some("yes-token"));
        assert_eq!(m.down_token_id.as_deref(), Some("no-token"));
    }

    #[test]
    fn winner_resolves_from_outcome_prices() {
        assert_eq!(
            winner_from_outcome_prices(&["1".to_string(), "0".to_string()]),
            Some(Side::Up)
        );
        assert_eq!(
            winner_from_outcome_prices(&["0".to_string(), "1".to_string()]),
            Some(Side::Down)
        );
        assert_eq!(
            winner_from_outcome_prices(&["0.5".to_string(), "0.5".to_string()]),
            None
        );
    }
}
