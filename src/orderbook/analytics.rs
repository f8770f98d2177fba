use serde::Serialize;

use super::OrderbookSnapshot;

const DEPTH_EPSILON: f64 = 1e-9;

/// Derived spread and arbitrage metrics for one binary pair.
///
/// The two books mirror each other: a bid on YES at `p` is the same exposure
/// as an ask on NO at `1 - p`. Effective prices fold that identity in so the
/// cheapest acquisition (or richest disposal) of a side is visible across
/// both ladders.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PairMetrics {
    pub yes_best_bid: f64,
    pub yes_best_ask: f64,
    pub no_best_bid: f64,
    pub no_best_ask: f64,
    pub yes_bid_size: f64,
    pub yes_ask_size: f64,
    pub no_bid_size: f64,
    pub no_ask_size: f64,
    pub yes_bid_depth: f64,
    pub yes_ask_depth: f64,
    pub no_bid_depth: f64,
    pub no_ask_depth: f64,
    pub ask_sum: f64,
    pub bid_sum: f64,
    pub effective_buy_yes: f64,
    pub effective_buy_no: f64,
    pub effective_sell_yes: f64,
    pub effective_sell_no: f64,
    /// 1 − (effectiveBuyYes + effectiveBuyNo); positive means buy both and merge.
    pub long_arb_profit: f64,
    /// (effectiveSellYes + effectiveSellNo) − 1; positive means split and sell both.
    pub short_arb_profit: f64,
    pub imbalance_ratio: f64,
}

// A missing ask means the side cannot be bought cheaper than full payout; a
// missing bid means it cannot be sold at all.
fn ask_or_one(book: &OrderbookSnapshot) -> f64 {
    book.best_ask().map(|l| l.price).unwrap_or(1.0)
}

fn bid_or_zero(book: &OrderbookSnapshot) -> f64 {
    book.best_bid().map(|l| l.price).unwrap_or(0.0)
}

impl PairMetrics {
    pub fn compute(yes: &OrderbookSnapshot, no: &OrderbookSnapshot) -> Self {
        let yes_ask = ask_or_one(yes);
        let no_ask = ask_or_one(no);
        let yes_bid = bid_or_zero(yes);
        let no_bid = bid_or_zero(no);

        let effective_buy_yes = yes_ask.min(1.0 - no_bid);
        let effective_buy_no = no_ask.min(1.0 - yes_bid);
        let effective_sell_yes = yes_bid.max(1.0 - no_ask);
        let effective_sell_no = no_bid.max(1.0 - yes_ask);

        let total_bid_depth = yes.bid_depth() + no.bid_depth();
        let total_ask_depth = yes.ask_depth() + no.ask_depth();

        Self {
            yes_best_bid: yes.best_bid_price(),
            yes_best_ask: yes.best_ask_price(),
            no_best_bid: no.best_bid_price(),
            no_best_ask: no.best_ask_price(),
            yes_bid_size: yes.best_bid().map(|l| l.size).unwrap_or(0.0),
            yes_ask_size: yes.best_ask().map(|l| l.size).unwrap_or(0.0),
            no_bid_size: no.best_bid().map(|l| l.size).unwrap_or(0.0),
            no_ask_size: no.best_ask().map(|l| l.size).unwrap_or(0.0),
            yes_bid_depth: yes.bid_depth(),
            yes_ask_depth: yes.ask_depth(),
            no_bid_depth: no.bid_depth(),
            no_ask_depth: no.ask_depth(),
            ask_sum: yes_ask + no_ask,
            bid_sum: yes_bid + no_bid,
            effective_buy_yes,
            effective_buy_no,
            effective_sell_yes,
            effective_sell_no,
            long_arb_profit: 1.0 - (effective_buy_yes + effective_buy_no),
            short_arb_profit: (effective_sell_yes + effective_sell_no) - 1.0,
            imbalance_ratio: total_bid_depth / (total_ask_depth + DEPTH_EPSILON),
        }
    }
}

/// Structural arbitrage read on one pair snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ArbOpportunity {
    /// Buy both sides below one unit of quote, then merge.
    Long { profit_per_pair: f64, action: String },
    /// Split quote into the pair and sell both sides above one unit.
    Short { profit_per_pair: f64, action: String },
    None,
}

pub fn detect_arbitrage(metrics: &PairMetrics, threshold: f64) -> ArbOpportunity {
    if metrics.long_arb_profit > threshold {
        ArbOpportunity::Long {
            profit_per_pair: metrics.long_arb_profit,
            action: format!(
                "buy YES at {:.4} and NO at {:.4}, merge for {:.4} per pair",
                metrics.effective_buy_yes, metrics.effective_buy_no, metrics.long_arb_profit
            ),
        }
    } else if metrics.short_arb_profit > threshold {
        ArbOpportunity::Short {
            profit_per_pair: metrics.short_arb_profit,
            action: format!(
                "split and sell YES at {:.4} and NO at {:.4} for {:.4} per pair",
                metrics.effective_sell_yes, metrics.effective_sell_no, metrics.short_arb_profit
            ),
        }
    } else {
        ArbOpportunity::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::BookLevel;
    use chrono::Utc;

    fn book(token: &str, bid: Option<(f64, f64)>, ask: Option<(f64, f64)>) -> OrderbookSnapshot {
        OrderbookSnapshot {
            token_id: token.to_string(),
            bids: bid
                .map(|(price, size)| vec![BookLevel { price, size }])
                .unwrap_or_default(),
            asks: ask
                .map(|(price, size)| vec![BookLevel { price, size }])
                .unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn long_arbitrage_detected_below_unit_cost() {
        // yesAsk=0.45 yesBid=0.40 noAsk=0.50 noBid=0.45
        let yes = book("yes", Some((0.40, 10.0)), Some((0.45, 10.0)));
        let no = book("no", Some((0.45, 10.0)), Some((0.50, 10.0)));
        let m = PairMetrics::compute(&yes, &no);

        assert!((m.effective_buy_yes - 0.45).abs() < 1e-12);
        assert!((m.effective_buy_no - 0.50).abs() < 1e-12);
        assert!((m.long_arb_profit - 0.05).abs() < 1e-12);

        match detect_arbitrage(&m, 0.005) {
            ArbOpportunity::Long {
                profit_per_pair,
                action,
            } => {
                assert!((profit_per_pair - 0.05).abs() < 1e-12);
                assert!(action.contains("0.4500"));
                assert!(action.contains("0.5000"));
            }
            other => panic!("expected long opportunity, got {other:?}"),
        }
    }

    #[test]
    fn mirror_identity_rules_out_false_arbitrage() {
        // yesAsk=0.60 yesBid=0.45 noAsk=0.50 noBid=0.35
        let yes = book("yes", Some((0.45, 10.0)), Some((0.60, 10.0)));
        let no = book("no", Some((0.35, 10.0)), Some((0.50, 10.0)));
        let m = PairMetrics::compute(&yes, &no);

        assert!((m.effective_buy_yes - 0.60).abs() < 1e-12);
        assert!((m.effective_buy_no - 0.50).abs() < 1e-12);
        assert_eq!(detect_arbitrage(&m, 0.005), ArbOpportunity::None);
    }

    #[test]
    fn short_arbitrage_detected_above_unit_revenue() {
        let yes = book("yes", Some((0.58, 10.0)), Some((0.62, 10.0)));
        let no = book("no", Some((0.46, 10.0)), Some((0.50, 10.0)));
        let m = PairMetrics::compute(&yes, &no);

        assert!(m.short_arb_profit > 0.0);
        assert!(matches!(
            detect_arbitrage(&m, 0.005),
            ArbOpportunity::Short { .. }
        ));
    }

    #[test]
    fn empty_books_produce_no_opportunity() {
        let yes = book("yes", None, None);
        let no = book("no", None, None);
        let m = PairMetrics::compute(&yes, &no);
        assert_eq!(detect_arbitrage(&m, 0.005), ArbOpportunity::None);
        assert!(m.imbalance_ratio < 1e-3);
    }
}
