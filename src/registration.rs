//! Backend registration listener.
//!
//! A backend announces itself by connecting to the registration port and
//! sending a single `host:port` line. Malformed lines are discarded
//! silently.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{BalancerError, BalancerResult};
use crate::pool::{Backend, PoolManager};

/// The registration accept loop.
pub struct RegistrationListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: Arc<PoolManager>,
}

impl RegistrationListener {
    /// Bind the registration listener.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Bind`] if the port cannot be bound.
    pub async fn bind(addr: SocketAddr, pool: Arc<PoolManager>) -> BalancerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BalancerError::Bind {
                listener: "registration",
                port: addr.port(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Registration listener bound");

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

    /// Accept registrations until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let pool = Arc::clone(&self.pool);
                        tokio::spawn(handle_registration(pool, stream, peer));
                    },
                    Err(e) => warn!(error = %e, "Failed to accept registration connection"),
                },
                _ = shutdown.recv() => {
                    info!("Registration listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Read one `host:port` line and close.
async fn handle_registration(pool: Arc<PoolManager>, stream: TcpStream, peer: SocketAddr) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(_) => match line.trim().parse::<Backend>() {
            Ok(backend) => {
                pool.add(backend);
            },
            Err(_) => debug!(peer = %peer, line = line.trim(), "Discarding malformed registration"),
        },
        Err(e) => debug!(peer = %peer, error = %e, "Failed to read registration line"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn start(pool: Arc<PoolManager>) -> (SocketAddr, broadcast::Sender<()>) {
        let listener = RegistrationListener::bind("127.0.0.1:0".parse().unwrap(), pool)
            .await
            .unwrap();
        let addr = listener.local_addr();
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(listener.run(shutdown_tx.subscribe()));
        (addr, shutdown_tx)
    }

    async fn wait_for_len(pool: &PoolManager, len: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while pool.len() != len {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pool never reached expected size");
    }

    #[tokio::test]
    async fn test_registration_adds_backend() {
        let pool = Arc::new(PoolManager::new());
        let (addr, _shutdown) = start(Arc::clone(&pool)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"127.0.0.1:7001\n").await.unwrap();
        drop(stream);

        wait_for_len(&pool, 1).await;
        assert_eq!(pool.snapshot()[0], Backend::new("127.0.0.1", 7001));
    }

    #[tokio::test]
    async fn test_malformed_registration_is_discarded() {
        let pool = Arc::new(PoolManager::new());
        let (addr, _shutdown) = start(Arc::clone(&pool)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"not a backend\n").await.unwrap();
        drop(stream);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"127.0.0.1:7001\n").await.unwrap();
        drop(stream);

        wait_for_len(&pool, 1).await;
        assert_eq!(pool.snapshot()[0], Backend::new("127.0.0.1", 7001));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_idempotent() {
        let pool = Arc::new(PoolManager::new());
        let (addr, _shutdown) = start(Arc::clone(&pool)).await;

        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"127.0.0.1:7001\n").await.unwrap();
            drop(stream);
        }

        wait_for_len(&pool, 1).await;
        // Give the later registrations a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(pool.len(), 1);
    }
}
