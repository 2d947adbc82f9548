//! FHIR Job Worker - Background Worker Host
//!
//! Hosts the job execution core against the queue store: export
//! orchestration, queue maintenance, and the metrics listener. Partition
//! processing executors are registered here only when a clinical-store
//! engine is wired in.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use ferrum_jobs::config::JobsConfig;
use ferrum_jobs::jobs::export;
use ferrum_jobs::queue::{PostgresJobQueue, QueueType};
use ferrum_jobs::store::{
    PgStoreProvider, ReplicaRouter, RetryOptions, RetryService, TransientErrorCatalog,
};
use ferrum_jobs::workers::{JobHosting, JobHostingConfig, JobRegistry};
use ferrum_jobs::Config;

mod http;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "fhir-job-worker", about = "FHIR job queue worker host", version)]
struct Cli {
    /// Override the number of concurrent worker slots
    #[arg(long)]
    workers: Option<usize>,

    /// Skip running schema migrations at startup
    #[arg(long)]
    no_migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration first to get logging settings
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        config.jobs.max_running_job_count = workers;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        slots = config.jobs.max_running_job_count,
        "Starting FHIR job worker"
    );

    let provider = Arc::new(
        PgStoreProvider::from_config(&config.database)
            .context("Failed to create connection pools")?,
    );
    let router = ReplicaRouter::new(
        config.database.replica_traffic_ratio,
        Duration::from_secs(config.database.replica_ratio_cache_seconds),
    );
    let retry = Arc::new(RetryService::new(
        TransientErrorCatalog::from_retry_config(&config.database.retry),
        RetryOptions::from_config(&config.database.retry),
        router,
    ));
    let queue = Arc::new(PostgresJobQueue::new(provider, retry));
    if !cli.no_migrate {
        queue
            .migrate()
            .await
            .context("Failed to run schema migrations")?;
    }

    let mut registry = JobRegistry::new();
    export::register_orchestrator(
        &mut registry,
        queue.clone(),
        config.export.orchestrator_poll_interval(),
    );
    // Hosts wired to the clinical store also call
    // export::register_processing with their engine.
    tracing::info!(
        job_types = ?registry.registered_type_ids(),
        "job registry populated"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hosting = Arc::new(JobHosting::new(
        queue.clone(),
        Arc::new(registry),
        JobHostingConfig::from_config(&config.jobs),
    ));
    tracing::info!(worker_id = hosting.worker_id(), "worker identity assigned");
    let hosting_handle = tokio::spawn(hosting.run(QueueType::Export, shutdown_rx.clone()));

    let archival_handle = tokio::spawn(archival_loop(
        queue.clone(),
        config.jobs.clone(),
        shutdown_rx.clone(),
    ));

    let metrics_handle = if config.metrics.enabled {
        Some(tokio::spawn(http::serve_metrics(
            config.metrics.listen_address.clone(),
            shutdown_rx,
        )))
    } else {
        None
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    hosting_handle.await.ok();
    archival_handle.await.ok();
    if let Some(handle) = metrics_handle {
        handle.await.ok();
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Periodically move old terminal jobs into the archived state.
async fn archival_loop(
    queue: Arc<PostgresJobQueue>,
    config: JobsConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.archive_interval()) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        match queue.archive_completed(config.archive_retention()).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "archived terminal jobs"),
            Err(error) => tracing::error!(%error, "job archival failed"),
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
/// Docker sends SIGTERM, while Ctrl+C sends SIGINT
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => {
            tracing::info!("SIGINT received, starting graceful shutdown...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, starting graceful shutdown...");
        }
    }
}

/// Wait for shutdown signal (SIGINT only on non-Unix platforms)
#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
