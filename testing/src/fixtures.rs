//! Ready-made principals, submissions and engines.

use crate::memory::InMemoryStore;
use crate::mocks::{FixedClock, test_clock};
use chrono::{DateTime, Utc};
use kawach_core::validate::{LocationSubmission, MediaSubmission};
use kawach_core::{PoliceStation, Principal, StationId, Stores, UserId};
use kawach_runtime::{Engine, EngineConfig};
use std::sync::Arc;
use std::time::Duration;

/// A citizen principal
#[must_use]
pub fn user(id: &str) -> Principal {
    Principal::User(UserId::new(id))
}

/// A police station principal
#[must_use]
pub fn station(id: &str) -> Principal {
    Principal::Station(StationId::new(id))
}

/// Directory entry for a police station
#[must_use]
pub fn police_station(id: &str, latitude: f64, longitude: f64) -> PoliceStation {
    PoliceStation {
        station_id: StationId::new(id),
        name: format!("{id} station"),
        latitude,
        longitude,
        credential_hash: String::new(),
    }
}

/// Location submission recorded at `recorded_at`
#[must_use]
pub fn ping_at(latitude: f64, longitude: f64, recorded_at: DateTime<Utc>) -> LocationSubmission {
    LocationSubmission {
        latitude: Some(latitude),
        longitude: Some(longitude),
        recorded_at: Some(recorded_at),
    }
}

/// Media submission with a storage reference derived from `key`
#[must_use]
pub fn media(kind: &str, key: &str) -> MediaSubmission {
    MediaSubmission {
        kind: Some(kind.to_string()),
        storage_reference: Some(format!("s3://kawach-media/{key}")),
        idempotency_key: Some(key.to_string()),
        captured_at: None,
    }
}

/// Configuration that gives up on contended locks quickly
#[must_use]
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        lock_wait: Duration::from_millis(50),
        busy_retries: 1,
        busy_backoff: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

/// Engine over `store` on a fresh [`test_clock`]
#[must_use]
pub fn engine(store: &InMemoryStore) -> Engine {
    engine_with_clock(store, &test_clock())
}

/// Engine over `store` reading time from `clock`
#[must_use]
pub fn engine_with_clock(store: &InMemoryStore, clock: &FixedClock) -> Engine {
    Engine::builder(Stores::from_backend(Arc::new(store.clone())))
        .clock(Arc::new(clock.clone()))
        .config(fast_config())
        .build()
}

/// Install a test subscriber honouring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
