use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arbiter_pool::{SystemSampler, WorkerPool};
use tokio::sync::watch;

mod config;
mod executor;
mod loadgen;
mod telemetry;

use config::RunnerConfig;
use executor::FlakyExecutor;
use loadgen::LoadGenerator;
use telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    let env_file = dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "arbiter_worker=info,arbiter_pool=info")
    // - LOG_FORMAT=json: JSON log lines
    init_telemetry(TelemetryConfig::from_env());

    tracing::info!("arbiter-worker starting...");
    if let Some(path) = env_file {
        tracing::info!(path = %path.display(), "Loaded .env file");
    }

    let config = RunnerConfig::from_env().context("Failed to load runner configuration")?;

    tracing::info!(
        min_workers = config.pool.min_workers,
        max_workers = config.pool.max_workers,
        tasks_per_sec = config.tasks_per_sec,
        failure_rate = config.failure_rate,
        "Starting worker pool"
    );

    let pool = Arc::new(
        WorkerPool::new(
            config.pool.clone(),
            Arc::new(FlakyExecutor::new(config.failure_rate)),
            Arc::new(SystemSampler::new()),
        )
        .context("Failed to create worker pool")?,
    );
    pool.start().await.context("Failed to start worker pool")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loadgen = config.loadgen_enabled().then(|| {
        tokio::spawn(LoadGenerator::new(pool.clone(), config.tasks_per_sec).run(shutdown_rx))
    });

    // Report until shutdown
    tokio::select! {
        _ = report_metrics(&pool, config.metrics_interval) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = loadgen {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Load generator task failed");
        }
    }

    pool.stop().await.context("Failed to stop worker pool")?;

    let totals = pool.get_metrics().totals;
    tracing::info!(
        submitted = totals.submitted,
        completed = totals.completed,
        retried = totals.retried,
        dropped = totals.dropped,
        "Worker pool shutdown complete"
    );
    Ok(())
}

/// Log a metrics snapshot and the current recommendations every `period`
async fn report_metrics(pool: &WorkerPool, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // first tick fires immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        match serde_json::to_string(&pool.get_metrics()) {
            Ok(metrics) => tracing::info!(metrics = %metrics, "Pool metrics"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize pool metrics"),
        }

        let health = pool.check_health();
        if !health.healthy {
            tracing::warn!(
                worker_count = health.worker_count,
                unresponsive = health.unresponsive_workers.len(),
                "Pool unhealthy"
            );
        }

        for recommendation in pool.get_recommendations() {
            tracing::info!(%recommendation, "Recommendation");
        }
    }
}
