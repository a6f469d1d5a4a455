//! Periodic backend liveness sweep.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::pool::{Backend, PoolManager};
use crate::wire;

/// Sweeps the pool on a fixed interval and removes unreachable backends.
///
/// Probes run sequentially within a tick, which is fine at the pool sizes
/// this balancer targets. A backend the dispatcher reaps concurrently is a
/// no-op here; removal is idempotent.
pub struct HealthChecker {
    pool: Arc<PoolManager>,
    config: HealthConfig,
}

impl HealthChecker {
    /// Create a new health checker over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PoolManager>, config: HealthConfig) -> Self {
        Self { pool, config }
    }

    /// Run sweeps until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            debug!("Health checks disabled");
            return;
        }

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Health checker started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Health checker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => self.sweep().await,
            }
        }
    }

    /// Probe every backend in the current snapshot once.
    pub async fn sweep(&self) {
        let snap = self.pool.snapshot();
        for backend in snap.iter() {
            if !self.probe(backend).await {
                warn!(backend = %backend, "Backend failed liveness probe, removing");
                self.pool.remove(backend);
            }
        }
    }

    /// Check one backend: a TCP connect within the deadline means alive.
    ///
    /// The probe frame after the connect is best-effort; reachability was
    /// already established, so a failed write does not count against the
    /// backend.
    async fn probe(&self, backend: &Backend) -> bool {
        let connected = timeout(
            self.config.timeout,
            TcpStream::connect((backend.host(), backend.port())),
        )
        .await;
        match connected {
            Ok(Ok(mut stream)) => {
                if let Err(e) = wire::write_utf(&mut stream, wire::PROBE_FRAME).await {
                    debug!(backend = %backend, error = %e, "Probe write failed after connect");
                }
                true
            },
            Ok(Err(e)) => {
                debug!(backend = %backend, error = %e, "Probe connect failed");
                false
            },
            Err(_) => {
                debug!(backend = %backend, "Probe connect timed out");
                false
            },
        }
    }
}
