//! Balancer configuration types.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Configuration for the balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Address the listeners bind to.
    pub bind_address: IpAddr,

    /// Port for client sessions.
    pub client_port: u16,

    /// Port for backend registrations.
    pub registration_port: u16,

    /// Port for backend metrics pushes.
    pub metrics_port: u16,

    /// Copy buffer size for the session pipes.
    pub pipe_buffer: usize,

    /// Timeout when dialing a backend for a client session.
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Health sweep settings.
    pub health: HealthConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            client_port: 5000,
            registration_port: 6001,
            metrics_port: 6003,
            pipe_buffer: 4096,
            dial_timeout: Duration::from_secs(2),
            health: HealthConfig::default(),
        }
    }
}

impl BalancerConfig {
    /// Address of the client listener.
    #[must_use]
    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.client_port)
    }

    /// Address of the registration listener.
    #[must_use]
    pub fn registration_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.registration_port)
    }

    /// Address of the metrics listener.
    #[must_use]
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.metrics_port)
    }

    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or does not match
    /// the schema.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Health sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic liveness sweep.
    pub enabled: bool,

    /// Period of the liveness sweep.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe connect deadline.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BalancerConfig::default();
        assert_eq!(config.client_port, 5000);
        assert_eq!(config.registration_port, 6001);
        assert_eq!(config.metrics_port, 6003);
        assert_eq!(config.pipe_buffer, 4096);
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert!(config.health.enabled);
        assert_eq!(config.health.interval, Duration::from_secs(3));
        assert_eq!(config.health.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_listener_addrs() {
        let config = BalancerConfig::default();
        assert_eq!(config.client_addr(), "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.registration_addr(), "0.0.0.0:6001".parse().unwrap());
        assert_eq!(config.metrics_addr(), "0.0.0.0:6003".parse().unwrap());
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            bind_address = "127.0.0.1"
            client_port = 9000
            pipe_buffer = 8192
            dial_timeout = "500ms"

            [health]
            enabled = false
            interval = "10s"
            timeout = "2s"
        "#;

        let config = BalancerConfig::from_toml(toml).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.client_port, 9000);
        // Unset fields keep their defaults.
        assert_eq!(config.registration_port, 6001);
        assert_eq!(config.pipe_buffer, 8192);
        assert_eq!(config.dial_timeout, Duration::from_millis(500));
        assert!(!config.health.enabled);
        assert_eq!(config.health.interval, Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_empty_config() {
        let config = BalancerConfig::from_toml("").unwrap();
        assert_eq!(config.client_port, 5000);
    }
}
