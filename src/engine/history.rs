use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::markets::Side;

/// Bound on retained price points; oldest entries are evicted first.
pub const HISTORY_CAPACITY: usize = 100;

/// One observed (timestamp, UP best-ask, DOWN best-ask) triple.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricePoint {
    pub ts: DateTime<Utc>,
    pub up_ask: f64,
    pub down_ask: f64,
}

impl PricePoint {
    pub fn ask(&self, side: Side) -> f64 {
        match side {
            Side::Up => self.up_ask,
            Side::Down => self.down_ask,
        }
    }
}

/// Bounded ring of recent best-ask pairs, reset on every new round.
#[derive(Clone, Debug, Default)]
pub struct PriceHistory {
    points: VecDeque<PricePoint>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn push(&mut self, ts: DateTime<Utc>, up_ask: f64, down_ask: f64) {
        if self.points.len() == HISTORY_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(PricePoint { ts, up_ask, down_ask });
    }

    /// Most recent point at or before `cutoff`. Returns None when the ring
    /// holds nothing that old, so a partially-filled window can never produce
    /// a reference.
    pub fn reference_at(&self, cutoff: DateTime<Utc>) -> Option<&PricePoint> {
        self.points.iter().rev().find(|p| p.ts <= cutoff)
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn reference_is_most_recent_at_or_before_cutoff() {
        let mut h = PriceHistory::new();
        h.push(ts(0), 0.50, 0.50);
        h.push(ts(2), 0.48, 0.52);
        h.push(ts(5), 0.40, 0.58);

        let r = h.reference_at(ts(3)).expect("reference should exist");
        assert_eq!(r.ts, ts(2));
        assert!((r.ask(Side::Up) - 0.48).abs() < 1e-12);

        // Cutoff before the oldest entry yields nothing.
        assert!(h.reference_at(ts(-1)).is_none());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut h = PriceHistory::new();
        for i in 0..(HISTORY_CAPACITY as i64 + 10) {
            h.push(ts(i), 0.5, 0.5);
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
        // The first ten points are gone.
        assert!(h.reference_at(ts(9)).is_none());
        assert!(h.reference_at(ts(10)).is_some());
    }

    #[test]
    fn clear_resets_the_ring() {
        let mut h = PriceHistory::new();
        h.push(ts(0), 0.5, 0.5);
        h.clear();
        assert!(h.is_empty());
        assert!(h.reference_at(ts(10)).is_none());
    }
}
