//! Jobpool daemon: SQLite-backed job queue worker

mod config;
mod handlers;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{DaemonConfig, LogFormat};
use jobpool_core::application::worker::JobWorker;
use jobpool_core::application::RecoveryService;
use jobpool_core::port::id_provider::UuidProvider;
use jobpool_core::port::time_provider::SystemTimeProvider;
use jobpool_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

const DEFAULT_LOG_FILTER: &str = "jobpool_core=info,jobpool_infra_sqlite=info,jobpool_daemon=info";

fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    // Optional daily-rolling JSON file next to the console output
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "jobpool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);
    match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration and initialize logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = init_logging(&config)?;

    info!(
        "Jobpool daemon v{} (core v{}) starting...",
        env!("CARGO_PKG_VERSION"),
        jobpool_core::VERSION
    );

    // 2. Initialize database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    info!(db_path = %config.db_path, "Initializing database...");
    let pool = create_pool(&config.db_path)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteJobStore::new(
        pool.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
    ));

    // 4. Requeue jobs a previous process left running
    info!("Running crash recovery...");
    let recovery = RecoveryService::new(store.clone(), time_provider.clone(), None);
    match recovery.recover_orphaned_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 5. Start worker
    let worker = JobWorker::with_time_provider(store, config.worker, time_provider)?;
    handlers::register_builtin_handlers(&worker)?;
    worker.start().await?;

    info!(handlers = ?worker.registered_types(), "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining in-flight jobs...");

    // 7. Graceful shutdown
    if !worker.stop_timeout(config.shutdown_timeout).await? {
        warn!(
            in_flight = worker.in_flight(),
            "Shutdown timeout elapsed; unfinished jobs will be requeued on next start"
        );
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
