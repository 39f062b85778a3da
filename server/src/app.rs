//! Wiring: stores, engine, notification relay and routers.

use crate::config::Config;
use crate::dispatch::LogDispatcher;
use axum::{Router, routing::get};
use kawach_core::Stores;
use kawach_postgres::PostgresStore;
use kawach_runtime::{Engine, NotificationRelay};
use kawach_testing::InMemoryStore;
use kawach_web::{AppState, build_router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The assembled service.
pub struct App {
    /// API router
    pub router: Router,
    /// Notification relay task; finishes once the router is dropped and the
    /// queue drained
    pub relay_worker: JoinHandle<()>,
}

/// Open the stores named by `config` and assemble the engine and router.
///
/// With a database URL the `PostgreSQL` store is connected and migrated;
/// without one the engine runs on the in-memory store.
///
/// # Errors
///
/// Connection or migration failures.
pub async fn build_app(config: &Config) -> anyhow::Result<App> {
    let stores = match &config.database {
        Some(database) => {
            info!(max_connections = database.max_connections, "connecting to PostgreSQL");
            let store = PostgresStore::connect(&database.url, database.max_connections).await?;
            store.migrate().await?;
            info!("database migrations applied");
            Stores::from_backend(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, tickets are kept in memory only");
            Stores::from_backend(Arc::new(InMemoryStore::new()))
        }
    };

    let (relay, relay_worker) =
        NotificationRelay::spawn(Arc::new(LogDispatcher), config.relay_capacity);
    let engine = Engine::builder(stores)
        .config(config.engine.clone())
        .sink(Arc::new(relay))
        .build();

    Ok(App {
        router: build_router(AppState::new(engine)),
        relay_worker,
    })
}

/// Router serving the Prometheus scrape payload at `/metrics`.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}
