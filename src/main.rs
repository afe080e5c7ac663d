//! FitPub binary entry point

use std::time::Duration;

use fitpub::{AppState, config};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize AppState (keys provisioned, interrupted deliveries requeued)
/// 4. Start delivery workers and the retention task
/// 5. Serve HTTP until ctrl-c, then stop the workers
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    tracing::info!("Starting FitPub...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        local_actors = config.federation.local_actors.len(),
        "Configuration loaded"
    );

    fitpub::metrics::init_metrics();

    // 3. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 4. Start background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = state.workers.clone().spawn(shutdown_rx.clone());
    let maintenance = spawn_maintenance_task(state.clone(), shutdown_rx);

    // 5. Start HTTP server
    let app = fitpub::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down delivery workers...");
    // Receivers also treat a closed channel as shutdown.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Delivery worker panicked");
        }
    }
    maintenance.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("fitpub={},tower_http=debug", logging.level).into()
    });

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Spawn the retention and key cache maintenance task
fn spawn_maintenance_task(
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let interval_secs = state.config.delivery.cleanup_interval_secs.max(1);
    // Bounded so `now - retention` cannot overflow.
    let retention_days = state.config.delivery.retention_days.min(36_500) as i64;

    let handle = tokio::spawn(async move {
        let retention = chrono::Duration::days(retention_days);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            match state.queue.cleanup_dead_lettered_tasks(retention).await {
                Ok(deleted) => tracing::debug!(deleted, "Dead-letter retention pass finished"),
                Err(error) => tracing::error!(%error, "Dead-letter cleanup failed"),
            }
            match state.queue.cleanup_delivered_tasks(retention).await {
                Ok(deleted) => tracing::debug!(deleted, "Delivered retention pass finished"),
                Err(error) => tracing::error!(%error, "Delivered task cleanup failed"),
            }

            let pruned = state.key_fetcher.prune_expired().await;
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned expired remote keys");
            }
        }
    });

    tracing::info!(interval_secs, "Maintenance task spawned");
    handle
}
