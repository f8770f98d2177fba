use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::client::clob::ClobClient;
use crate::client::ClientResult;
use crate::markets::Market;

pub mod analytics;

pub use analytics::{detect_arbitrage, ArbOpportunity, PairMetrics};

/// One normalized price level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Price and size fields arrive as strings from some endpoints and as bare
/// numbers from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumField {
    Num(f64),
    Str(String),
}

impl NumField {
    fn as_f64(&self) -> f64 {
        match self {
            NumField::Num(n) => *n,
            NumField::Str(s) => s.parse().unwrap_or(f64::NAN),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawLevel {
    price: NumField,
    size: NumField,
}

/// Wire-format order book for one token, before normalization.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct RawOrderbook {
    pub asset_id: String,
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
    /// Millisecond UNIX timestamp, serialized as a string.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Normalized order book snapshot for one outcome token.
///
/// Bids are sorted descending and asks ascending; levels that fail to parse
/// to finite positive numbers are dropped. A missing wire timestamp is
/// substituted with the wall clock.
#[derive(Clone, Debug)]
pub struct OrderbookSnapshot {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

fn normalize_levels(raw: &[RawLevel]) -> Vec<BookLevel> {
    raw.iter()
        .filter_map(|l| {
            let price = l.price.as_f64();
            let size = l.size.as_f64();
            if price.is_finite() && size.is_finite() && price > 0.0 && size > 0.0 {
                Some(BookLevel { price, size })
            } else {
                None
            }
        })
        .collect()
}

impl OrderbookSnapshot {
    pub fn from_raw(raw: RawOrderbook) -> Self {
        let mut bids = normalize_levels(&raw.bids);
        let mut asks = normalize_levels(&raw.asks);
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));

        let timestamp = raw
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Self {
            token_id: raw.asset_id,
            bids,
            asks,
            timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn best_bid_price(&self) -> f64 {
        self.best_bid().map(|l| l.price).unwrap_or(0.0)
    }

    pub fn best_ask_price(&self) -> f64 {
        self.best_ask().map(|l| l.price).unwrap_or(0.0)
    }

    /// Quote-denominated depth on the bid side (Σ price·size).
    pub fn bid_depth(&self) -> f64 {
        self.bids.iter().map(|l| l.price * l.size).sum()
    }

    /// Quote-denominated depth on the ask side (Σ price·size).
    pub fn ask_depth(&self) -> f64 {
        self.asks.iter().map(|l| l.price * l.size).sum()
    }
}

/// Snapshots for both sides of one binary pair.
#[derive(Clone, Debug)]
pub struct PairBooks {
    pub up: OrderbookSnapshot,
    pub down: OrderbookSnapshot,
}

/// REST-backed snapshot service over the CLOB book endpoint.
pub struct OrderbookService {
    clob: Arc<ClobClient>,
}

impl OrderbookService {
    pub fn new(clob: Arc<ClobClient>) -> Self {
        Self { clob }
    }

    pub async fn fetch_book(&self, token_id: &str) -> ClientResult<OrderbookSnapshot> {
        let raw: RawOrderbook = self
            .clob
            .get_public(&format!("/book?token_id={token_id}"))
            .await?;
        Ok(OrderbookSnapshot::from_raw(raw))
    }

    pub async fn fetch_pair(&self, market: &Market) -> ClientResult<PairBooks> {
        let (up, down) = tokio::try_join!(
            self.fetch_book(&market.up_token_id),
            self.fetch_book(&market.down_token_id)
        )?;
        Ok(PairBooks { up, down })
    }

    /// Fetch both books and run the spread/arbitrage analytics over them.
    pub async fn analyze_pair(
        &self,
        market: &Market,
        arb_threshold: f64,
    ) -> ClientResult<(PairMetrics, ArbOpportunity)> {
        let books = self.fetch_pair(market).await?;
        let metrics = PairMetrics::compute(&books.up, &books.down);
        let opportunity = detect_arbitrage(&metrics, arb_threshold);
        Ok((metrics, opportunity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_parses_strings_sorts_and_drops_garbage() {
        let raw: RawOrderbook = serde_json::from_str(
            r#"{
                "asset_id": "tok-1",
                "bids": [
                    {"price": "0.40", "size": "10"},
                    {"price": "0.45", "size": "5"},
                    {"price": "oops", "size": "5"},
                    {"price": "0.30", "size": "0"}
                ],
                "asks": [
                    {"price": 0.55, "size": 3},
                    {"price": "0.50", "size": "7"}
                ],
                "timestamp": "1700000000123"
            }"#,
        )
        .unwrap();

        let book = OrderbookSnapshot::from_raw(raw);
        assert_eq!(book.token_id, "tok-1");
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 2);
        assert!((book.best_bid_price() - 0.45).abs() < 1e-12);
        assert!((book.best_ask_price() - 0.50).abs() < 1e-12);
        assert_eq!(book.timestamp.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn missing_timestamp_falls_back_to_wall_clock() {
        let raw: RawOrderbook =
            serde_json::from_str(r#"{"asset_id": "tok-2", "bids": [], "asks": []}"#).unwrap();
        let before = Utc::now();
        let book = OrderbookSnapshot::from_raw(raw);
        assert!(book.timestamp >= before);
        assert_eq!(book.best_bid_price(), 0.0);
        assert_eq!(book.best_ask_price(), 0.0);
    }
}
