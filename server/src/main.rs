//! Kawach emergency ticket server.
//!
//! Serves the ticket API, the dashboards' live feed and a Prometheus scrape
//! endpoint. Configuration comes from the environment (see [`Config`]).

use kawach_runtime::metrics::MetricsServer;
use kawach_server::app::metrics_router;
use kawach_server::{Config, build_app};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kawach=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kawach server");

    let config = Config::from_env()?;
    let addr = config.server.addr()?;
    let metrics_addr = config.server.metrics_addr()?;
    info!(
        %addr,
        %metrics_addr,
        persistent = config.database.is_some(),
        lock_wait = ?config.engine.lock_wait,
        station_radius_km = config.engine.station_radius_km,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;
    if let Some(handle) = metrics.handle().cloned() {
        let listener = tokio::net::TcpListener::bind(metrics.addr()).await?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_router(handle)).await {
                error!(error = %e, "metrics listener failed");
            }
        });
        info!(address = %metrics_addr, "Metrics listening");
    }

    let app = build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app.router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(());
        })
        .into_future();

    let timeout = config.server.shutdown_timeout;
    tokio::select! {
        result = server => result?,
        () = drain_deadline(stopping_rx, timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "Shutdown timeout elapsed, closing open connections");
        }
    }

    // The router is gone, so the relay drains its queue and stops.
    match tokio::time::timeout(timeout, app.relay_worker).await {
        Ok(Ok(())) => info!("Notification relay drained"),
        Ok(Err(e)) => error!(error = %e, "Notification relay task failed"),
        Err(_) => warn!("Notification relay did not drain in time"),
    }

    info!("Server stopped");
    Ok(())
}

/// Resolves `timeout` after shutdown starts; never resolves before that.
async fn drain_deadline(stopping: oneshot::Receiver<()>, timeout: Duration) {
    if stopping.await.is_err() {
        // Server finished without a signal
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(timeout).await;
}

/// Graceful shutdown signal handler.
///
/// Waits for Ctrl+C (SIGINT) or SIGTERM.
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
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
