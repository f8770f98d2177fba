use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod discovery;

pub use discovery::{scan_crypto_short_term_markets, DiscoveredMarket, MarketQuery, SortBy};

/// Underlying asset of a short-term UP/DOWN market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Underlying {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Underlying {
    /// Lowercase slug prefix used by the venue, e.g. "btc".
    pub fn slug(&self) -> &'static str {
        match self {
            Underlying::Btc => "btc",
            Underlying::Eth => "eth",
            Underlying::Sol => "sol",
            Underlying::Xrp => "xrp",
        }
    }

    /// Ticker symbol, e.g. "BTC".
    pub fn symbol(&self) -> &'static str {
        match self {
            Underlying::Btc => "BTC",
            Underlying::Eth => "ETH",
            Underlying::Sol => "SOL",
            Underlying::Xrp => "XRP",
        }
    }

    /// Oracle stream symbol, e.g. "BTC/USD".
    pub fn oracle_symbol(&self) -> String {
        format!("{}/USD", self.symbol())
    }
}

impl FromStr for Underlying {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btc" => Ok(Underlying::Btc),
            "eth" => Ok(Underlying::Eth),
            "sol" => Ok(Underlying::Sol),
            "xrp" => Ok(Underlying::Xrp),
            other => Err(format!("unsupported underlying: {other}")),
        }
    }
}

impl fmt::Display for Underlying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Round duration of a short-term market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketDuration {
    M5,
    M15,
}

impl MarketDuration {
    pub fn minutes(&self) -> i64 {
        match self {
            MarketDuration::M5 => 5,
            MarketDuration::M15 => 15,
        }
    }

    pub fn interval_seconds(&self) -> i64 {
        self.minutes() * 60
    }

    /// Slug fragment used by the venue, e.g. "15m".
    pub fn label(&self) -> &'static str {
        match self {
            MarketDuration::M5 => "5m",
            MarketDuration::M15 => "15m",
        }
    }
}

impl FromStr for MarketDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "5m" | "5" => Ok(MarketDuration::M5),
            "15m" | "15" => Ok(MarketDuration::M15),
            other => Err(format!("unsupported duration: {other}")),
        }
    }
}

/// Which side of the binary pair a token settles on.
///
/// Venue metadata labels outcomes "Up"/"Down" or "Yes"/"No"; both map onto
/// the same two-sided tag here. When labels are absent callers fall back to
/// index order (first token = Up).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }

    /// Case-insensitive parse of a venue outcome label.
    pub fn parse_outcome(label: &str) -> Option<Side> {
        match label.to_ascii_lowercase().as_str() {
            "up" | "yes" => Some(Side::Up),
            "down" | "no" => Some(Side::Down),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Up => "UP",
            Side::Down => "DOWN",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A short-duration binary outcome market. Immutable after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub slug: String,
    pub underlying: Underlying,
    pub duration: MarketDuration,
    pub end_time: DateTime<Utc>,
    pub up_token_id: String,
    pub down_token_id: String,
}

impl Market {
    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }

    /// Side traded by a token id, if the token belongs to this market.
    pub fn side_of(&self, token_id: &str) -> Option<Side> {
        if token_id == self.up_token_id {
            Some(Side::Up)
        } else if token_id == self.down_token_id {
            Some(Side::Down)
        } else {
            None
        }
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn seconds_until_end(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds()
    }

    /// Both token ids must be present for the market to be tradeable.
    pub fn validate(&self) -> Result<(), String> {
        if self.up_token_id.is_empty() {
            return Err(format!("market {} is missing the UP token id", self.slug));
        }
        if self.down_token_id.is_empty() {
            return Err(format!("market {} is missing the DOWN token id", self.slug));
        }
        Ok(())
    }
}

/// Floor a timestamp to the start of its round slot.
pub fn slot_start(unix_secs: i64, duration: MarketDuration) -> i64 {
    let interval = duration.interval_seconds();
    unix_secs.div_euclid(interval) * interval
}

/// Venue slug for an UP/DOWN market: `{coin}-updown-{5m|15m}-{slotStartUnix}`.
pub fn build_slug(underlying: Underlying, duration: MarketDuration, slot_start_unix: i64) -> String {
    format!(
        "{}-updown-{}-{}",
        underlying.slug(),
        duration.label(),
        slot_start_unix
    )
}

/// Parse a venue slug back into its parts. Returns None for foreign slugs.
pub fn parse_slug(slug: &str) -> Option<(Underlying, MarketDuration, i64)> {
    let mut parts = slug.split('-');
    let underlying: Underlying = parts.next()?.parse().ok()?;
    if parts.next()? != "updown" {
        return None;
    }
    let duration: MarketDuration = parts.next()?.parse().ok()?;
    let slot: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((underlying, duration, slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_parse_case_insensitively() {
        assert_eq!(Side::parse_outcome("Up"), Some(Side::Up));
        assert_eq!(Side::parse_outcome("YES"), Some(Side::Up));
        assert_eq!(Side::parse_outcome("down"), Some(Side::Down));
        assert_eq!(Side::parse_outcome("No"), Some(Side::Down));
        assert_eq!(Side::parse_outcome("maybe"), None);
    }

    #[test]
    fn slug_format_matches_venue_convention() {
        // 2024-01-01T12:07:30Z floors to the 12:00 slot for 15m markets.
        let ts = 1_704_110_850;
        let slot = slot_start(ts, MarketDuration::M15);
        assert_eq!(slot % 900, 0);
        let slug = build_slug(Underlying::Btc, MarketDuration::M15, slot);
        assert_eq!(slug, format!("btc-updown-15m-{slot}"));

        let slot5 = slot_start(ts, MarketDuration::M5);
        assert_eq!(slot5 % 300, 0);
        assert_eq!(
            build_slug(Underlying::Sol, MarketDuration::M5, slot5),
            format!("sol-updown-5m-{slot5}")
        );
    }

    #[test]
    fn slug_round_trips_through_parse() {
        let slug = build_slug(Underlying::Eth, MarketDuration::M5, 1_704_110_400);
        assert_eq!(
            parse_slug(&slug),
            Some((Underlying::Eth, MarketDuration::M5, 1_704_110_400))
        );
        assert_eq!(parse_slug("will-it-rain-tomorrow"), None);
        assert_eq!(parse_slug("btc-updown-10m-1704110400"), None);
    }

    #[test]
    fn market_validation_requires_both_tokens() {
        let mut m = Market {
            condition_id: "0xc0ffee".to_string(),
            slug: "btc-updown-15m-1704110400".to_string(),
            underlying: Underlying::Btc,
            duration: MarketDuration::M15,
            end_time: Utc::now(),
            up_token_id: "111".to_string(),
            down_token_id: "222".to_string(),
        };
        assert!(m.validate().is_ok());
        assert_eq!(m.side_of("111"), Some(Side::Up));
        assert_eq!(m.side_of("222"), Some(Side::Down));
        assert_eq!(m.side_of("333"), None);

        m.down_token_id.clear();
        assert!(m.validate().is_err());
    }
}
