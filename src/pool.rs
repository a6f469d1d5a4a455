//! Backend pool management.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::BalancerError;

/// A single backend worker, identified by its address pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    host: String,
    port: u16,
}

impl Backend {
    /// Create a new backend.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the backend host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the backend port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Canonical identity string, `host:port`.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Backend {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| BalancerError::InvalidBackendAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(BalancerError::InvalidBackendAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| BalancerError::InvalidBackendAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// The shared registry of live backends and their latest metrics.
///
/// The backend sequence is copy-on-write: [`PoolManager::snapshot`] hands out
/// an `Arc` to an immutable slice, so the dispatcher can index into it for
/// one placement decision without holding any lock while mutations swap in a
/// fresh slice. Insertion order is the index space placement hashes into;
/// removing an entry shifts later indices down by one.
#[derive(Debug, Default)]
pub struct PoolManager {
    backends: RwLock<Arc<[Backend]>>,
    metrics: RwLock<HashMap<String, String>>,
}

impl PoolManager {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Idempotent; returns whether it was newly added.
    pub fn add(&self, backend: Backend) -> bool {
        let mut backends = self.backends.write().expect("backends lock poisoned");
        if backends.contains(&backend) {
            return false;
        }
        let mut next: Vec<Backend> = backends.to_vec();
        info!(backend = %backend, "Backend registered");
        next.push(backend);
        *backends = Arc::from(next);
        true
    }

    /// Remove a backend and its metrics record. No-op when absent.
    pub fn remove(&self, backend: &Backend) {
        let removed = {
            let mut backends = self.backends.write().expect("backends lock poisoned");
            match backends.iter().position(|b| b == backend) {
                Some(index) => {
                    let mut next: Vec<Backend> = backends.to_vec();
                    next.remove(index);
                    *backends = Arc::from(next);
                    true
                },
                None => false,
            }
        };

        if removed {
            self.metrics
                .write()
                .expect("metrics lock poisoned")
                .remove(&backend.id());
            info!(backend = %backend, "Backend removed");
        }
    }

    /// Atomic snapshot of the backend sequence, safe for indexing without a
    /// lock. The returned slice never mutates under the caller.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Backend]> {
        Arc::clone(&self.backends.read().expect("backends lock poisoned"))
    }

    /// Number of live backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.read().expect("backends lock poisoned").len()
    }

    /// Check whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the latest metrics line for a backend. Last write wins.
    ///
    /// A metrics push is also an implicit registration: when `backend_id`
    /// parses as `host:port` and the backend is not yet present, it is added.
    pub fn set_metrics(&self, backend_id: &str, line: String) {
        self.metrics
            .write()
            .expect("metrics lock poisoned")
            .insert(backend_id.to_string(), line);

        match backend_id.parse::<Backend>() {
            Ok(backend) => {
                if self.add(backend) {
                    debug!(backend = backend_id, "Backend auto-registered via metrics");
                }
            },
            Err(_) => debug!(backend = backend_id, "Metrics id is not a backend address"),
        }
    }

    /// Snapshot of the latest metrics line per backend.
    #[must_use]
    pub fn metrics(&self) -> HashMap<String, String> {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(port: u16) -> Backend {
        Backend::new("10.0.0.1", port)
    }

    #[test]
    fn test_backend_display_and_parse() {
        let b = Backend::new("127.0.0.1", 7001);
        assert_eq!(b.to_string(), "127.0.0.1:7001");
        assert_eq!("127.0.0.1:7001".parse::<Backend>().unwrap(), b);
    }

    #[test]
    fn test_backend_parse_rejects_garbage() {
        assert!("".parse::<Backend>().is_err());
        assert!("localhost".parse::<Backend>().is_err());
        assert!(":8080".parse::<Backend>().is_err());
        assert!("host:notaport".parse::<Backend>().is_err());
        assert!("host:70000".parse::<Backend>().is_err());
    }

    #[test]
    fn test_add_is_idempotent() {
        let pool = PoolManager::new();
        assert!(pool.add(backend(7001)));
        assert!(!pool.add(backend(7001)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_insertion_order_is_index_space() {
        let pool = PoolManager::new();
        pool.add(backend(7001));
        pool.add(backend(7002));
        pool.add(backend(7003));

        let snap = pool.snapshot();
        assert_eq!(snap[0], backend(7001));
        assert_eq!(snap[1], backend(7002));
        assert_eq!(snap[2], backend(7003));
    }

    #[test]
    fn test_remove_shifts_later_indices() {
        let pool = PoolManager::new();
        pool.add(backend(7001));
        pool.add(backend(7002));
        pool.add(backend(7003));

        pool.remove(&backend(7002));
        let snap = pool.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0], backend(7001));
        assert_eq!(snap[1], backend(7003));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let pool = PoolManager::new();
        pool.add(backend(7001));
        pool.remove(&backend(9999));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let pool = PoolManager::new();
        pool.add(backend(7001));
        pool.add(backend(7002));

        let snap = pool.snapshot();
        pool.remove(&backend(7001));

        // The held snapshot still sees the pre-mutation sequence.
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0], backend(7001));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_metrics_auto_registers() {
        let pool = PoolManager::new();
        pool.set_metrics("127.0.0.1:7002", r#"{"backendId":"127.0.0.1:7002"}"#.to_string());

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.snapshot()[0], Backend::new("127.0.0.1", 7002));
        assert!(pool.metrics().contains_key("127.0.0.1:7002"));
    }

    #[test]
    fn test_metrics_last_write_wins() {
        let pool = PoolManager::new();
        pool.set_metrics("h:1", "first".to_string());
        pool.set_metrics("h:1", "second".to_string());
        assert_eq!(pool.metrics()["h:1"], "second");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_evicts_metrics() {
        let pool = PoolManager::new();
        pool.set_metrics("10.0.0.1:7001", "{}".to_string());
        assert!(pool.metrics().contains_key("10.0.0.1:7001"));

        pool.remove(&backend(7001));
        assert!(pool.metrics().is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_unparseable_metrics_id_keeps_record_only() {
        let pool = PoolManager::new();
        pool.set_metrics("not-an-address", "{}".to_string());
        assert!(pool.is_empty());
        assert!(pool.metrics().contains_key("not-an-address"));
    }
}
