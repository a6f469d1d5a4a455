//! Backend metrics listener.
//!
//! Backends push newline-delimited JSON on the metrics port. Each line is
//! stored verbatim as the backend's latest metrics record, keyed by its
//! `backendId` field; the payload beyond that field is opaque. A push from
//! an unknown backend is an implicit registration.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{BalancerError, BalancerResult};
use crate::pool::PoolManager;

/// The metrics accept loop.
pub struct MetricsListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: Arc<PoolManager>,
}

impl MetricsListener {
    /// Bind the metrics listener.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Bind`] if the port cannot be bound.
    pub async fn bind(addr: SocketAddr, pool: Arc<PoolManager>) -> BalancerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BalancerError::Bind {
                listener: "metrics",
                port: addr.port(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Metrics listener bound");

        Ok(Self {
            listener,
            local_addr,
            pool,
        })
    }

    /// Get the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept metrics connections until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let pool = Arc::clone(&self.pool);
                        tokio::spawn(handle_metrics(pool, stream, peer));
                    },
                    Err(e) => warn!(error = %e, "Failed to accept metrics connection"),
                },
                _ = shutdown.recv() => {
                    info!("Metrics listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Consume newline-delimited JSON records until EOF.
///
/// A line that is not JSON or carries no string `backendId` is discarded;
/// the connection stays open for further lines.
async fn handle_metrics(pool: Arc<PoolManager>, stream: TcpStream, peer: SocketAddr) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match extract_backend_id(&line) {
                Some(id) => pool.set_metrics(&id, line),
                None => debug!(peer = %peer, "Discarding metrics line without backendId"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Metrics connection error");
                break;
            },
        }
    }
}

/// Pull the `backendId` string out of a JSON metrics line.
fn extract_backend_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("backendId")?.as_str().map(str::to_owned)
}
