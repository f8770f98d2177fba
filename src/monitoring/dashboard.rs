use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::warn;

use crate::monitoring::metrics::{log_metrics_snapshot, METRICS};

/// Spawn a background task that periodically logs a compact metrics snapshot.
///
/// This provides a simple terminal "dashboard" when combined with `tracing`
/// JSON logs and `jq`/`grep` on the operator side.
pub fn spawn_dashboard_task(period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            log_metrics_snapshot(&METRICS.snapshot());
        }
    });
}

/// Minimal TCP health endpoint.
///
/// Answers every connection with a JSON document carrying the liveness
/// verdict and the current metrics snapshot. The request itself is drained
/// but not parsed; one listener serves any probe that speaks enough HTTP to
/// read a response.
pub async fn serve_health(addr: &str, max_staleness: Duration) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (mut socket, peer) = listener.accept().await?;

        let mut request = [0u8; 512];
        let _ = socket.readable().await;
        let _ = socket.try_read(&mut request);

        let status = if METRICS.is_healthy(max_staleness) {
            "ok"
        } else {
            "stale"
        };
        let body = serde_json::json!({
            "status": status,
            "metrics": METRICS.snapshot(),
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n{}",
            body.len(),
            body
        );

        if let Err(err) = socket.write_all(response.as_bytes()).await {
            warn!(target: "monitoring", peer = %peer, error = %err, "health response failed");
            continue;
        }
        let _ = socket.shutdown().await;
    }
}
