//! Balancer error types.

use thiserror::Error;

/// Errors that can occur while running the balancer.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// A listener failed to bind its port.
    #[error("failed to bind {listener} listener on port {port}: {source}")]
    Bind {
        /// Which listener failed (client, registration, metrics).
        listener: &'static str,
        /// The port that could not be bound.
        port: u16,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect to a backend.
    #[error("failed to connect to backend {backend}: {source}")]
    BackendConnect {
        /// The backend identity (`host:port`).
        backend: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to a backend exceeded the dial timeout.
    #[error("connection to backend {backend} timed out")]
    BackendConnectTimeout {
        /// The backend identity (`host:port`).
        backend: String,
    },

    /// A backend address string did not parse as `host:port`.
    #[error("invalid backend address '{0}'")]
    InvalidBackendAddress(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error during data transfer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;
