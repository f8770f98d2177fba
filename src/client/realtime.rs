use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

use crate::orderbook::{OrderbookSnapshot, RawOrderbook};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl From<ConnectionState> for u8 {
    fn from(value: ConnectionState) -> Self {
        match value {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Disconnected => 3,
        }
    }
}

/// Oracle price tick for one underlying, e.g. symbol "BTC/USD".
#[derive(Clone, Debug)]
pub struct OraclePrice {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawOraclePrice {
    symbol: String,
    #[serde(alias = "value")]
    price: f64,
    #[serde(default)]
    timestamp: Option<i64>,
}

struct MarketSub {
    tokens: Vec<String>,
    tx: mpsc::UnboundedSender<OrderbookSnapshot>,
}

struct OracleSub {
    symbols: Vec<String>,
    tx: mpsc::UnboundedSender<OraclePrice>,
}

#[derive(Default)]
struct Registry {
    markets: HashMap<u64, MarketSub>,
    oracles: HashMap<u64, OracleSub>,
}

impl Registry {
    fn subscription_frames(&self) -> Vec<Message> {
        let mut frames = Vec::new();
        for sub in self.markets.values() {
            frames.push(Message::Text(
                serde_json::json!({ "type": "market", "assets_ids": sub.tokens }).to_string(),
            ));
        }
        for sub in self.oracles.values() {
            frames.push(Message::Text(
                serde_json::json!({ "type": "crypto_prices", "symbols": sub.symbols }).to_string(),
            ));
        }
        frames
    }

    fn route_book(&mut self, book: &OrderbookSnapshot) {
        let mut dead = Vec::new();
        for (id, sub) in &self.markets {
            if sub.tokens.iter().any(|t| t == &book.token_id)
                && sub.tx.send(book.clone()).is_err()
            {
                dead.push(*id);
            }
        }
        for id in dead {
            self.markets.remove(&id);
        }
    }

    fn route_oracle(&mut self, price: &OraclePrice) {
        let mut dead = Vec::new();
        for (id, sub) in &self.oracles {
            if sub.symbols.iter().any(|s| s == &price.symbol)
                && sub.tx.send(price.clone()).is_err()
            {
                dead.push(*id);
            }
        }
        for id in dead {
            self.oracles.remove(&id);
        }
    }
}

struct RealtimeInner {
    outbound_tx: mpsc::UnboundedSender<Message>,
    registry: Mutex<Registry>,
    state: AtomicU8,
    connected: Notify,
    next_sub_id: AtomicU64,
}

enum SubscriptionKind {
    Market,
    Oracle,
}

/// Named handle for one logical stream; dropping it does nothing, the caller
/// unsubscribes explicitly. The handle holds only a weak reference so a
/// subscriber can never keep the transport alive through its own callback.
pub struct SubscriptionHandle {
    id: u64,
    kind: SubscriptionKind,
    inner: Weak<RealtimeInner>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut registry = inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            match self.kind {
                SubscriptionKind::Market => {
                    registry.markets.remove(&self.id);
                }
                SubscriptionKind::Oracle => {
                    registry.oracles.remove(&self.id);
                }
            }
        }
    }
}

/// Multiplexes one WebSocket connection into per-token order book streams and
/// per-symbol oracle price streams.
///
/// The connection is maintained by a background task that reconnects with
/// jittered exponential backoff and replays all active subscription frames
/// after each successful handshake. Messages missed while reconnecting are
/// not replayed; the venue's next full book snapshot supersedes them.
pub struct RealtimeClient {
    inner: Arc<RealtimeInner>,
}

impl RealtimeClient {
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(RealtimeInner {
            outbound_tx,
            registry: Mutex::new(Registry::default()),
            state: AtomicU8::new(ConnectionState::Connecting.into()),
            connected: Notify::new(),
            next_sub_id: AtomicU64::new(1),
        });

        let task_inner = Arc::clone(&inner);
        tokio::spawn(run_connection_loop(url, outbound_rx, task_inner));

        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.load(Ordering::SeqCst).into()
    }

    /// Wait for the first (or next) successful handshake, up to `timeout`.
    /// Returns false when the deadline passes; callers may proceed
    /// optimistically since subscriptions are replayed on connect.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        if self.state() == ConnectionState::Connected {
            return true;
        }
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.connected.notified();
                if self.state() == ConnectionState::Connected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Subscribe to order book snapshots for a set of outcome tokens.
    pub fn subscribe_markets(
        &self,
        token_ids: &[String],
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<OrderbookSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.markets.insert(
                id,
                MarketSub {
                    tokens: token_ids.to_vec(),
                    tx,
                },
            );
        }
        let frame = serde_json::json!({ "type": "market", "assets_ids": token_ids }).to_string();
        let _ = self.inner.outbound_tx.send(Message::Text(frame));

        (
            SubscriptionHandle {
                id,
                kind: SubscriptionKind::Market,
                inner: Arc::downgrade(&self.inner),
            },
            rx,
        )
    }

    /// Subscribe to oracle prices for a set of symbols, e.g. ["BTC/USD"].
    pub fn subscribe_oracle_prices(
        &self,
        symbols: &[String],
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<OraclePrice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.oracles.insert(
                id,
                OracleSub {
                    symbols: symbols.to_vec(),
                    tx,
                },
            );
        }
        let frame = serde_json::json!({ "type": "crypto_prices", "symbols": symbols }).to_string();
        let _ = self.inner.outbound_tx.send(Message::Text(frame));

        (
            SubscriptionHandle {
                id,
                kind: SubscriptionKind::Oracle,
                inner: Arc::downgrade(&self.inner),
            },
            rx,
        )
    }
}

enum SessionExit {
    /// All senders are gone; the client itself was dropped.
    Shutdown,
    /// The connection failed or the server closed it; reconnect.
    Reconnect,
}

fn dispatch_text(inner: &RealtimeInner, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        // Non-JSON frames such as PONG echoes.
        Err(_) => return,
    };

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                dispatch_event(inner, item);
            }
        }
        other => dispatch_event(inner, other),
    }
}

fn dispatch_event(inner: &RealtimeInner, value: serde_json::Value) {
    let event_type = value
        .get("event_type")
        .and_then(|e| e.as_str())
        .unwrap_or_default();

    if event_type == "book" {
        match serde_json::from_value::<RawOrderbook>(value) {
            Ok(raw) => {
                let book = OrderbookSnapshot::from_raw(raw);
                let mut registry = inner.registry.lock().unwrap_or_else(|e| e.into_inner());
                registry.route_book(&book);
            }
            Err(err) => debug!(target: "realtime", error = %err, "unparseable book event"),
        }
        return;
    }

    // Oracle ticks are recognized structurally: some feeds tag them
    // "crypto_price", others leave event_type empty.
    if value.get("symbol").is_some() && (value.get("price").is_some() || value.get("value").is_some())
    {
        match serde_json::from_value::<RawOraclePrice>(value) {
            Ok(raw) => {
                let price = OraclePrice {
                    symbol: raw.symbol,
                    price: raw.price,
                    timestamp: raw
                        .timestamp
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                        .unwrap_or_else(Utc::now),
                };
                let mut registry = inner.registry.lock().unwrap_or_else(|e| e.into_inner());
                registry.route_oracle(&price);
            }
            Err(err) => debug!(target: "realtime", error = %err, "unparseable oracle event"),
        }
    }
}

async fn run_session(
    url: &str,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
    inner: &Arc<RealtimeInner>,
) -> SessionExit {
    let ws_stream = match connect_async(url).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            warn!(target: "realtime", error = %err, "websocket connect failed");
            return SessionExit::Reconnect;
        }
    };

    inner
        .state
        .store(ConnectionState::Connected.into(), Ordering::SeqCst);
    inner.connected.notify_waiters();

    let (mut write, mut read) = ws_stream.split();

    // Replay every active subscription so streams resume after a drop.
    let frames = {
        let registry = inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.subscription_frames()
    };
    for frame in frames {
        if write.send(frame).await.is_err() {
            return SessionExit::Reconnect;
        }
    }

    let mut heartbeat = interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            maybe_out = outbound_rx.recv() => {
                match maybe_out {
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            return SessionExit::Reconnect;
                        }
                    }
                    None => return SessionExit::Shutdown,
                }
            }
            maybe_msg = read.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => dispatch_text(inner, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return SessionExit::Reconnect;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(target: "realtime", error = %err, "websocket read failed");
                        return SessionExit::Reconnect;
                    }
                    None => return SessionExit::Reconnect,
                }
            }
            _ = heartbeat.tick() => {
                if write.send(Message::Text("PING".to_string())).await.is_err() {
                    return SessionExit::Reconnect;
                }
            }
        }
    }
}

async fn run_connection_loop(
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    inner: Arc<RealtimeInner>,
) {
    let mut attempt: u32 = 0;
    loop {
        inner
            .state
            .store(ConnectionState::Connecting.into(), Ordering::SeqCst);

        let should_reconnect = matches!(
            run_session(&url, &mut outbound_rx, &inner).await,
            SessionExit::Reconnect
        );
        if !should_reconnect {
            inner
                .state
                .store(ConnectionState::Disconnected.into(), Ordering::SeqCst);
            return;
        }

        if inner.state.load(Ordering::SeqCst) == u8::from(ConnectionState::Connected) {
            // The previous session got as far as a handshake; start backoff over.
            attempt = 0;
        }
        attempt = attempt.saturating_add(1);
        inner
            .state
            .store(ConnectionState::Reconnecting.into(), Ordering::SeqCst);

        let backoff_ms = 500u64.saturating_mul(1u64 << attempt.min(5)).min(8_000);
        let jitter_ms = rand::rng().random_range(0..250);
        tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
    }
}
