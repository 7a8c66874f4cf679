//! Execution Core Binary
//!
//! Runs the execution core against the paper broker: restores the last
//! portfolio snapshot, reconciles, then keeps positions in sync and
//! snapshots flushed until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-core
//! ```
//!
//! # Environment Variables
//!
//! - `EXECUTION_CORE_CONFIG`: Path to the YAML config (default: config.yaml
//!   if present, built-in defaults otherwise)
//! - `RUST_LOG`: Log filter (default: `execution_core=<observability.log_level>`)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use execution_core::broker::{GuardedBroker, PaperBroker};
use execution_core::config::{CONFIG_PATH_ENV, Config, load_config};
use execution_core::contract::ContractResolver;
use execution_core::execution::ExecutionEngine;
use execution_core::market_data::PriceCache;
use execution_core::observability::init_metrics;
use execution_core::persistence::{
    InMemorySnapshotStore, JsonFileSnapshotStore, SnapshotPersister, SnapshotStore,
};
use execution_core::portfolio::PortfolioStore;
use execution_core::reconciliation::{ReconciliationScheduler, ReconciliationService};
use execution_core::resilience::{CircuitBreaker, RateLimiter};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default config file, used only if it exists.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Breaker name for the broker.
const BROKER_BREAKER_NAME: &str = "broker";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();
    let config = read_config()?;
    init_tracing(&config.observability.log_level);

    tracing::info!("Starting execution core");

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.to_metrics_config()?)?;
    }

    let snapshots = create_snapshot_store(&config);
    let portfolio = Arc::new(restore_portfolio(&config, snapshots.as_ref())?);
    let persister = Arc::new(SnapshotPersister::new(
        Arc::clone(&snapshots),
        Arc::clone(&portfolio),
        config.persistence.min_flush_interval(),
    ));

    let positions = portfolio.snapshot_positions();
    let paper = Arc::new(PaperBroker::with_positions(positions.values()));
    let broker = Arc::new(GuardedBroker::new(
        paper,
        Arc::new(RateLimiter::new(config.rate_limiter.to_resilience_config())),
        Arc::new(CircuitBreaker::new(
            BROKER_BREAKER_NAME,
            config.circuit_breaker.to_resilience_config(),
        )),
        config.rate_limiter.acquire_timeout(),
    )
    .with_max_workers(config.circuit_breaker.max_workers));

    let engine = Arc::new(
        ExecutionEngine::new(
            Arc::clone(&portfolio),
            Arc::clone(&broker),
            Arc::new(PriceCache::new(config.price_cache.to_cache_config())),
            ContractResolver::new(config.expiry_calendar.clone()),
        )
        .with_limits(config.engine.to_order_limits())
        .with_persister(Arc::clone(&persister)),
    );

    let reconciler = Arc::new(
        ReconciliationService::new(Arc::clone(&broker), Arc::clone(&portfolio))
            .with_price_tolerance(config.reconciliation.price_tolerance)
            .with_persister(Arc::clone(&persister)),
    );

    if config.reconciliation.on_startup {
        let service = Arc::clone(&reconciler);
        match tokio::task::spawn_blocking(move || service.run_once()).await? {
            Ok(report) => tracing::info!(
                discrepancies = report.discrepancies.len(),
                positions = report.broker_positions,
                "Startup reconciliation complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Startup reconciliation failed, continuing"),
        }
    }

    let shutdown_token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if config.reconciliation.enabled {
        tasks.push(
            ReconciliationScheduler::new(Arc::clone(&reconciler), config.reconciliation.interval())
                .spawn(shutdown_token.clone()),
        );
    }
    if config.persistence.enabled {
        tasks.push(spawn_flush_ticker(
            Arc::clone(&persister),
            config.persistence.min_flush_interval(),
            shutdown_token.clone(),
        ));
    }

    tracing::info!(
        cash = %portfolio.get_cash(),
        positions = portfolio.snapshot_positions().len(),
        version = portfolio.version(),
        "Execution core ready"
    );

    await_shutdown(shutdown_token, tasks).await;

    let engine_for_close = Arc::clone(&engine);
    if let Err(e) = tokio::task::spawn_blocking(move || engine_for_close.end_session()).await? {
        tracing::error!(error = %e, "Final snapshot flush failed");
    }

    tracing::info!("Execution core stopped");
    Ok(())
}

/// Load the config named by `EXECUTION_CORE_CONFIG`, else `config.yaml` if it
/// exists, else defaults.
fn read_config() -> Result<Config, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(load_config(Some(&path))?);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return Ok(load_config(Some(DEFAULT_CONFIG_PATH))?);
    }
    Ok(Config::default())
}

fn create_snapshot_store(config: &Config) -> Arc<dyn SnapshotStore> {
    if config.persistence.enabled {
        let store = JsonFileSnapshotStore::new(&config.persistence.path);
        tracing::info!(path = %store.path().display(), "Using snapshot file");
        Arc::new(store)
    } else {
        tracing::warn!("Persistence disabled, portfolio state will not survive restarts");
        Arc::new(InMemorySnapshotStore::new())
    }
}

/// Rebuild the portfolio from the last snapshot. A corrupt snapshot is fatal.
fn restore_portfolio(
    config: &Config,
    snapshots: &dyn SnapshotStore,
) -> Result<PortfolioStore, Box<dyn std::error::Error>> {
    match snapshots.load_snapshot()? {
        Some(snapshot) => {
            tracing::info!(
                version = snapshot.version,
                positions = snapshot.positions.len(),
                taken_at = %snapshot.taken_at,
                "Restoring portfolio from snapshot"
            );
            Ok(PortfolioStore::from_snapshot(snapshot)?)
        }
        None => {
            tracing::info!(
                initial_cash = %config.engine.initial_cash,
                "No snapshot found, starting fresh portfolio"
            );
            Ok(PortfolioStore::new(config.engine.initial_cash))
        }
    }
}

/// Flush dirty state on a fixed cadence.
fn spawn_flush_ticker(
    persister: Arc<SnapshotPersister>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = period.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let persister = Arc::clone(&persister);
            if let Ok(Err(e)) = tokio::task::spawn_blocking(move || persister.maybe_flush()).await {
                tracing::warn!(error = %e, "Periodic snapshot flush failed");
            }
        }
    })
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("execution_core={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wait for Ctrl+C, then stop background tasks.
async fn await_shutdown(shutdown_token: CancellationToken, tasks: Vec<JoinHandle<()>>) {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    shutdown_token.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
}
