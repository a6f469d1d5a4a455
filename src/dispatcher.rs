//! Client dispatcher and session proxy.
//!
//! One accept loop on the client port; every accepted connection becomes a
//! session task. A session hashes the client's IP (the IP alone, without the
//! ephemeral port, so reconnects from the same host keep landing on the same
//! backend; NAT'd clients sharing an IP share a backend, which is acceptable
//! here), picks a backend from a pool snapshot, dials it, acknowledges the
//! client, and then pipes bytes both ways until both directions see EOF.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BalancerConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::placement;
use crate::pool::{Backend, PoolManager};

/// Acknowledgement sent to a client once its backend leg is connected.
pub const OK_LINE: &str = "OK\n";

/// Sent to a client when the pool is empty.
pub const NO_BACKEND_LINE: &str = "No backend server available\n";

/// Atomic session statistics.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Total sessions accepted.
    pub sessions_total: AtomicU64,
    /// Currently active sessions.
    pub sessions_active: AtomicU64,
    /// Sessions turned away because the pool was empty.
    pub sessions_rejected: AtomicU64,
    /// Backend dial failures.
    pub dial_failures: AtomicU64,
    /// Bytes piped client -> backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes piped backend -> client.
    pub bytes_to_client: AtomicU64,
}

impl SessionStats {
    /// Record a session entering the piping phase.
    pub fn session_started(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session ending.
    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a client turned away on an empty pool.
    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend dial failure.
    pub fn dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record piped bytes for one finished session.
    pub fn bytes_piped(&self, to_backend: u64, to_client: u64) {
        self.bytes_to_backend.fetch_add(to_backend, Ordering::Relaxed);
        self.bytes_to_client.fetch_add(to_client, Ordering::Relaxed);
    }

    /// Get current active session count.
    #[must_use]
    pub fn active_sessions(&self) -> u64 {
        self.sessions_active.load(Ordering::Relaxed)
    }

    /// Get total session count.
    #[must_use]
    pub fn total_sessions(&self) -> u64 {
        self.sessions_total.load(Ordering::Relaxed)
    }
}

/// The client-facing listener and per-session proxy.
pub struct Dispatcher {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: Arc<PoolManager>,
    stats: Arc<SessionStats>,
    dial_timeout: Duration,
    pipe_buffer: usize,
}

impl Dispatcher {
    /// Bind the client listener.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Bind`] if the port cannot be bound.
    pub async fn bind(config: &BalancerConfig, pool: Arc<PoolManager>) -> BalancerResult<Self> {
        let addr = config.client_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BalancerError::Bind {
                listener: "client",
                port: addr.port(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Client listener bound");

        Ok(Self {
            listener,
            local_addr,
            pool,
            stats: Arc::new(SessionStats::default()),
            dial_timeout: config.dial_timeout,
            pipe_buffer: config.pipe_buffer,
        })
    }

    /// Get the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a handle to the session statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// Accept client sessions until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = Session {
                            pool: Arc::clone(&self.pool),
                            stats: Arc::clone(&self.stats),
                            dial_timeout: self.dial_timeout,
                            pipe_buffer: self.pipe_buffer,
                        };
                        tokio::spawn(session.handle(stream, peer));
                    },
                    Err(e) => warn!(error = %e, "Failed to accept client connection"),
                },
                _ = shutdown.recv() => {
                    info!("Client listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Everything one session task needs.
struct Session {
    pool: Arc<PoolManager>,
    stats: Arc<SessionStats>,
    dial_timeout: Duration,
    pipe_buffer: usize,
}

impl Session {
    async fn handle(self, mut client: TcpStream, peer: SocketAddr) {
        let client_key = peer.ip().to_string();

        let snap = self.pool.snapshot();
        if snap.is_empty() {
            self.stats.session_rejected();
            debug!(client = %peer, "No backend available, turning client away");
            let _ = client.write_all(NO_BACKEND_LINE.as_bytes()).await;
            return;
        }

        let h = placement::fliphash(client_key.as_bytes(), snap.len() as u64);
        // The modulo is a safety net; placement already stays below the
        // snapshot length.
        let backend = &snap[(h % snap.len() as u64) as usize];
        debug!(client = %peer, backend = %backend, "Session placed");

        let backend_stream = match self.dial(backend).await {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.dial_failure();
                warn!(error = %e, "Removing backend from pool");
                self.pool.remove(backend);
                return;
            },
        };

        // The acknowledgement must be on the wire before any client bytes
        // are forwarded, so the client can read the line without it mixing
        // into the upload stream.
        if let Err(e) = client.write_all(OK_LINE.as_bytes()).await {
            debug!(client = %peer, error = %e, "Failed to acknowledge client");
            return;
        }

        self.stats.session_started();
        let result = proxy(client, backend_stream, self.pipe_buffer).await;
        self.stats.session_closed();

        match result {
            Ok((up, down)) => {
                self.stats.bytes_piped(up, down);
                debug!(
                    client = %peer,
                    backend = %backend,
                    bytes_to_backend = up,
                    bytes_to_client = down,
                    "Session complete"
                );
            },
            Err(e) => debug!(client = %peer, backend = %backend, error = %e, "Session ended with I/O error"),
        }
    }

    /// Open the backend leg within the dial timeout.
    async fn dial(&self, backend: &Backend) -> BalancerResult<TcpStream> {
        let connected = timeout(
            self.dial_timeout,
            TcpStream::connect((backend.host(), backend.port())),
        )
        .await;
        match connected {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(BalancerError::BackendConnect {
                backend: backend.id(),
                source: e,
            }),
            Err(_) => Err(BalancerError::BackendConnectTimeout {
                backend: backend.id(),
            }),
        }
    }
}

/// Pipe bytes both ways until both directions see EOF.
///
/// The up-pipe half-closes the backend's write side on client EOF so the
/// backend observes end-of-request while its response direction stays open.
/// The first I/O error tears down both pipes; returning drops all four
/// halves, which closes both sockets.
async fn proxy(
    client: TcpStream,
    backend: TcpStream,
    buffer_size: usize,
) -> std::io::Result<(u64, u64)> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut backend_read, mut backend_write) = backend.into_split();

    let up = async {
        let n = pipe(&mut client_read, &mut backend_write, buffer_size).await?;
        backend_write.shutdown().await?;
        Ok::<u64, std::io::Error>(n)
    };
    let down = pipe(&mut backend_read, &mut client_write, buffer_size);

    tokio::try_join!(up, down)
}

/// Copy bytes until EOF, returning the number piped.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
