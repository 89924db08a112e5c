//! Engine binary for the Ecosim game server.
//!
//! Wires configuration, stores, backends and zone engines together, drives
//! every zone's clock on a fixed interval, and runs the configured batch
//! simulation jobs.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ecosim-config.yaml` (or `ECOSIM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect stores (`PostgreSQL` with migrations, or in-memory)
//! 4. Build the enabled backend slots
//! 5. Start the notification log
//! 6. Spawn one zone engine per configured zone
//! 7. Run batch simulation jobs in the background
//! 8. Tick every zone each month interval until Ctrl-C
//! 9. Close every zone, releasing backend resources

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ecosim_core::config::{EcosimConfig, JobSpec, LoggingConfig};
use ecosim_core::engine::{EngineContext, ZoneEngine, ZoneHandle};
use ecosim_core::report::ReportWriter;
use ecosim_core::{BackendSet, Notifier, SimJobOrchestrator};
use ecosim_db::{PostgresConfig, PostgresPool, Stores};
use ecosim_types::SimJob;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "ecosim-config.yaml";

/// Application entry point for the Ecosim engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        zones = config.zones.len(),
        species = config.catalog.len(),
        jobs = config.jobs.len(),
        silent = config.engine.silent,
        "ecosim-engine starting"
    );

    // 3. Connect stores.
    let pool = connect_postgres(&config).await?;
    let stores = pool.as_ref().map_or_else(Stores::memory, Stores::postgres);

    // 4. Build backends.
    let backends = BackendSet::from_config(&config.backends)?;
    for (kind, backend) in backends.enabled() {
        info!(backend = %kind, implementation = backend.name(), "Backend slot enabled");
    }

    // 5. Notification log.
    let notifier = Notifier::new(config.engine.silent);
    if !notifier.is_silent() {
        spawn_notification_log(&notifier);
    }

    // 6. Spawn zone engines.
    let ctx = EngineContext::new(&config, backends.clone(), &stores, notifier);
    let mut zones = Vec::with_capacity(config.zones.len());
    for seed in &config.zones {
        zones.push(ZoneEngine::spawn(seed, ctx.clone()).await?);
    }
    info!(zones = zones.len(), "Zone engines started");

    // 7. Batch simulation jobs.
    let orchestrator = SimJobOrchestrator::new(
        backends,
        stores.sim_jobs.clone(),
        Arc::clone(&ctx.catalog),
        ReportWriter::new(config.simjob.report_dir.clone()),
        config.simjob.description_max_len,
    );
    let jobs = spawn_jobs(orchestrator, config.jobs.clone());

    // 8. Clock loop.
    run_clock(&zones, Duration::from_millis(config.engine.month_interval_ms.max(1))).await?;

    // 9. Shutdown.
    info!("Shutdown requested, closing zones");
    for zone in &zones {
        if let Err(e) = zone.close().await {
            warn!(zone_id = %zone.zone(), error = %e, "zone already closed");
        }
    }
    if let Err(e) = jobs.await {
        warn!(error = %e, "simulation job task failed");
    }
    if let Some(pool) = pool {
        pool.close().await;
    }

    info!("ecosim-engine shutdown complete");
    Ok(())
}

/// Load configuration from `ECOSIM_CONFIG` or `ecosim-config.yaml`.
///
/// A missing file yields defaults with environment overrides applied.
fn load_config() -> Result<EcosimConfig, AppError> {
    let path = std::env::var("ECOSIM_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(EcosimConfig::from_file(&path)?)
    } else {
        let mut config = EcosimConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

async fn connect_postgres(config: &EcosimConfig) -> Result<Option<PostgresPool>, AppError> {
    let Some(url) = &config.infrastructure.postgres_url else {
        info!("No PostgreSQL configured, using in-memory stores");
        return Ok(None);
    };
    let pool = PostgresPool::connect(
        &PostgresConfig::new(url).with_max_connections(config.infrastructure.max_connections),
    )
    .await?;
    pool.run_migrations().await?;
    info!("PostgreSQL connected and migrated");
    Ok(Some(pool))
}

/// Stand-in for the lobby transport: log every notification as JSON.
fn spawn_notification_log(notifier: &Notifier) {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(json) => debug!(notification = %json, "zone notification"),
                    Err(e) => warn!(error = %e, "failed to serialize notification"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_jobs(orchestrator: SimJobOrchestrator, specs: Vec<JobSpec>) -> JoinHandle<()> {
    tokio::spawn(async move {
        for spec in specs {
            let job = SimJob::new(spec.description, spec.nodes, spec.timesteps);
            let outcome = orchestrator.run(job).await;
            for error in &outcome.errors {
                warn!(error = %error, "simulation job fault");
            }
            info!(
                job_id = ?outcome.job.job_id,
                status = outcome.job.status.as_str(),
                phase = %outcome.phase,
                "Simulation job done"
            );
        }
    })
}

/// Tick every zone once per `interval` until Ctrl-C.
async fn run_clock(zones: &[ZoneHandle], interval: Duration) -> Result<(), AppError> {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; month 1 is already seeded.
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                return Ok(());
            }
            _ = ticker.tick() => {
                for zone in zones {
                    match zone.tick().await {
                        Ok(month) => debug!(zone_id = %zone.zone(), month, "zone ticked"),
                        Err(e) => warn!(zone_id = %zone.zone(), error = %e, "zone tick failed"),
                    }
                }
            }
        }
    }
}
