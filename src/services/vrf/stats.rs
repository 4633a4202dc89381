// SPDX-License-Identifier: MIT

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[derive(Default)]
pub struct VrfStats {
    pub logs_received: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub parse_failures: AtomicU64,
    pub requests_added: AtomicU64,
    pub already_fulfilled: AtomicU64,
    pub simulation_failures: AtomicU64,
    pub insufficient_funds_waits: AtomicU64,
    pub fulfillments_enqueued: AtomicU64,
    pub mailbox_overflows: AtomicU64,
    pub pending_depth: AtomicU64,
}

pub async fn spawn_metrics_server(port: u16, stats: Arc<VrfStats>) -> Option<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("Metrics server failed to bind: {}", e);
            return None;
        }
    };

    let local = listener.local_addr().ok();
    if let Some(addr) = local {
        tracing::info!("Metrics server listening on {}", addr);
    }

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let body = render_metrics(&stats);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                Err(e) => {
                    tracing::warn!("Metrics accept error: {}", e);
                    continue;
                }
            }
        }
    });

    local
}

fn render_metrics(stats: &Arc<VrfStats>) -> String {
    let counter = |name: &str, value: &AtomicU64| {
        format!(
            "# TYPE {name} counter\n{name} {}\n",
            value.load(Ordering::Relaxed)
        )
    };
    let mut body = String::new();
    body.push_str(&counter("vrf_logs_received", &stats.logs_received));
    body.push_str(&counter("vrf_duplicates_skipped", &stats.duplicates_skipped));
    body.push_str(&counter("vrf_parse_failures", &stats.parse_failures));
    body.push_str(&counter("vrf_requests_added", &stats.requests_added));
    body.push_str(&counter("vrf_already_fulfilled", &stats.already_fulfilled));
    body.push_str(&counter(
        "vrf_simulation_failures",
        &stats.simulation_failures,
    ));
    body.push_str(&counter(
        "vrf_insufficient_funds_waits",
        &stats.insufficient_funds_waits,
    ));
    body.push_str(&counter(
        "vrf_fulfillments_enqueued",
        &stats.fulfillments_enqueued,
    ));
    body.push_str(&counter("vrf_mailbox_overflows", &stats.mailbox_overflows));
    body.push_str(&format!(
        "# TYPE vrf_pending_depth gauge\nvrf_pending_depth {}\n",
        stats.pending_depth.load(Ordering::Relaxed)
    ));
    body
}
