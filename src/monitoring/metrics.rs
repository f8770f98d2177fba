use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::info;

/// Global metrics registry used across the bot.
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::default);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[derive(Default)]
struct MetricsInner {
    book_updates: AtomicU64,
    signals_detected: AtomicU64,
    orders_submitted: AtomicU64,
    orders_failed: AtomicU64,
    rounds_completed: AtomicU64,
    rotations: AtomicU64,
    redemptions_settled: AtomicU64,
    last_event_ts: AtomicU64,
}

/// Lightweight metrics handle backed by atomics so it can be cloned cheaply.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Metrics {
    fn touch(&self) {
        self.inner
            .last_event_ts
            .store(now_unix_secs(), Ordering::Relaxed);
    }

    pub fn record_book_update(&self) {
        self.inner.book_updates.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_signal(&self, leg: &str) {
        self.inner.signals_detected.fetch_add(1, Ordering::Relaxed);
        self.touch();
        info!(
            target: "metrics",
            event = "signal",
            leg = %leg,
            total_signals = self.inner.signals_detected.load(Ordering::Relaxed),
            "signal detected"
        );
    }

    pub fn record_order_submitted(&self, order_id: &str) {
        self.inner.orders_submitted.fetch_add(1, Ordering::Relaxed);
        self.touch();
        info!(
            target: "metrics",
            event = "order_submitted",
            order = %order_id,
            total_orders = self.inner.orders_submitted.load(Ordering::Relaxed),
            "order submitted"
        );
    }

    pub fn record_order_failed(&self, reason: &str) {
        self.inner.orders_failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
        info!(
            target: "metrics",
            event = "order_failed",
            reason = %reason,
            total_failures = self.inner.orders_failed.load(Ordering::Relaxed),
            "order failed"
        );
    }

    pub fn record_round_complete(&self, status: &str) {
        self.inner.rounds_completed.fetch_add(1, Ordering::Relaxed);
        self.touch();
        info!(
            target: "metrics",
            event = "round_complete",
            status = %status,
            total_rounds = self.inner.rounds_completed.load(Ordering::Relaxed),
            "round finished"
        );
    }

    pub fn record_rotation(&self) {
        self.inner.rotations.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_settlement(&self) {
        self.inner.redemptions_settled.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn heartbeat(&self) {
        self.touch();
    }

    pub fn is_healthy(&self, max_staleness: Duration) -> bool {
        let last = self.inner.last_event_ts.load(Ordering::Relaxed);
        if last == 0 {
            // If we have never seen an event, treat as healthy immediately after startup.
            return true;
        }
        let now = now_unix_secs();
        now.saturating_sub(last) <= max_staleness.as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            book_updates: self.inner.book_updates.load(Ordering::Relaxed),
            signals_detected: self.inner.signals_detected.load(Ordering::Relaxed),
            orders_submitted: self.inner.orders_submitted.load(Ordering::Relaxed),
            orders_failed: self.inner.orders_failed.load(Ordering::Relaxed),
            rounds_completed: self.inner.rounds_completed.load(Ordering::Relaxed),
            rotations: self.inner.rotations.load(Ordering::Relaxed),
            redemptions_settled: self.inner.redemptions_settled.load(Ordering::Relaxed),
            last_event_ts: self.inner.last_event_ts.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of current metrics used by dashboards and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub book_updates: u64,
    pub signals_detected: u64,
    pub orders_submitted: u64,
    pub orders_failed: u64,
    pub rounds_completed: u64,
    pub rotations: u64,
    pub redemptions_settled: u64,
    pub last_event_ts: u64,
}

pub fn log_metrics_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        target: "metrics",
        event = "metrics_snapshot",
        book_updates = snapshot.book_updates,
        signals_detected = snapshot.signals_detected,
        orders_submitted = snapshot.orders_submitted,
        orders_failed = snapshot.orders_failed,
        rounds_completed = snapshot.rounds_completed,
        rotations = snapshot.rotations,
        redemptions_settled = snapshot.redemptions_settled,
        last_event_ts = snapshot.last_event_ts,
        "metrics snapshot"
    );
}
