//! FlipGate binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use flipgate::{
    BalancerConfig, BalancerError, Dispatcher, HealthChecker, MetricsListener, PoolManager,
    RegistrationListener,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Load the configuration file named by `FLIPGATE_CONFIG`, or defaults.
fn load_config() -> Result<BalancerConfig, BalancerError> {
    match std::env::var_os("FLIPGATE_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            BalancerConfig::from_toml(&raw).map_err(|e| BalancerError::Config(e.to_string()))
        },
        None => Ok(BalancerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        },
    };

    let pool = Arc::new(PoolManager::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut listeners_bound = 0u32;

    // Each listener binds independently; one unavailable port does not keep
    // the others from serving.
    let stats = match Dispatcher::bind(&config, Arc::clone(&pool)).await {
        Ok(dispatcher) => {
            let stats = dispatcher.stats();
            tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));
            listeners_bound += 1;
            Some(stats)
        },
        Err(e) => {
            error!(error = %e, "Client listener failed");
            None
        },
    };

    match RegistrationListener::bind(config.registration_addr(), Arc::clone(&pool)).await {
        Ok(listener) => {
            tokio::spawn(listener.run(shutdown_tx.subscribe()));
            listeners_bound += 1;
        },
        Err(e) => error!(error = %e, "Registration listener failed"),
    }

    match MetricsListener::bind(config.metrics_addr(), Arc::clone(&pool)).await {
        Ok(listener) => {
            tokio::spawn(listener.run(shutdown_tx.subscribe()));
            listeners_bound += 1;
        },
        Err(e) => error!(error = %e, "Metrics listener failed"),
    }

    let checker = HealthChecker::new(Arc::clone(&pool), config.health.clone());
    tokio::spawn(checker.run(shutdown_tx.subscribe()));

    info!("FlipGate running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    if let Some(stats) = stats {
        info!(
            sessions = stats.total_sessions(),
            backends = pool.len(),
            "Exiting"
        );
    }

    // The exit code reports total bind failure; a partially bound process
    // still served something and exits clean.
    if listeners_bound == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
