//! # FlipGate
//!
//! A TCP load balancer that routes client sessions to a dynamic pool of
//! self-registering backend workers using FlipHash consistent placement.
//!
//! ## Features
//!
//! - FlipHash placement: growing the pool from `n` to `n + 1` backends moves
//!   only ~`1/n` of client keys, each onto the new backend
//! - Byte-transparent proxying with correct half-close semantics
//! - Backend self-registration, push metrics, and periodic liveness sweeps
//!
//! ## Architecture
//!
//! Three listeners feed a shared [`pool::PoolManager`]: clients arrive at the
//! [`dispatcher::Dispatcher`], backends announce themselves at the
//! [`registration::RegistrationListener`] (or implicitly via their first push
//! to the [`metrics::MetricsListener`]), and the [`health::HealthChecker`]
//! reaps backends that stop answering. Placement is the pure function in
//! [`placement`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod placement;
pub mod pool;
pub mod registration;
pub mod wire;

pub use config::{BalancerConfig, HealthConfig};
pub use dispatcher::{Dispatcher, SessionStats};
pub use error::{BalancerError, BalancerResult};
pub use health::HealthChecker;
pub use metrics::MetricsListener;
pub use placement::fliphash;
pub use pool::{Backend, PoolManager};
pub use registration::RegistrationListener;
