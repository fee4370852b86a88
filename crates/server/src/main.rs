//! taskline operator daemon.
//!
//! Connects to the shared Redis instance, optionally restores envelopes left
//! in flight by a crashed process of this identity, and reports the backlog
//! of every queue identity until it is asked to stop.

use std::time::Duration;

use anyhow::Context;
use taskline_common::{AppResult, Config};
use taskline_queue::{HandlerRegistry, QueueBackend, QueueService, RedisBackend};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Log the backlog of every queue identity and this identity's error list.
async fn report_status<B: QueueBackend>(service: &QueueService<B>) {
    match service.status().await {
        Ok(status) => {
            let total: u64 = status.iter().map(|s| s.depth).sum();
            for queue in &status {
                info!(identity = %queue.identity, depth = queue.depth, "Queue backlog");
            }
            info!(queues = status.len(), total, "Backlog report");
        }
        Err(e) => error!(error = %e, "Failed to collect queue status"),
    }

    match service.error_len().await {
        Ok(0) => {}
        Ok(len) => info!(queue = %service.error_queue_key(), len, "Envelopes waiting in error list"),
        Err(e) => error!(error = %e, "Failed to read error list length"),
    }

    debug!(metrics = %service.metrics().to_prometheus(), "Queue metrics");
}

/// Connect, optionally recover, then report until a shutdown signal.
async fn run(config: Config) -> AppResult<()> {
    info!("Connecting to Redis...");
    let backend = RedisBackend::connect(&config.redis.url).await?;

    // No handlers: this process inspects queues and never consumes them
    let service = QueueService::new(config.queue.clone(), backend.clone(), HandlerRegistry::new())
        .with_flow_config(&config.flow, Some(backend.client()));

    info!(
        pending = %service.pending_key(),
        in_flight = %service.in_flight_key(),
        error_queue = %service.error_queue_key(),
        "Queue identity resolved"
    );

    if config.server.recover_on_start {
        let moved = service.recover().await?;
        info!(moved, "Recovery sweep complete");
    }

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.server.status_interval_secs.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => report_status(&service).await,
        }
    }

    service.stop().await;
    if let Err(e) = backend.close().await {
        error!(error = %e, "Failed to close Redis connection");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskline=debug".into()),
        )
        .init();

    info!("Starting taskline...");

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    if let Err(e) = run(config).await {
        error!(
            code = e.error_code(),
            transient = e.is_transient(),
            error = %e,
            "taskline stopped with an error"
        );
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
