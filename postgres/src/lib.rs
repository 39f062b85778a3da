//! `PostgreSQL` backend for the Kawach ticket engine.
//!
//! [`PostgresStore`] implements every store contract from `kawach-core` over
//! one connection pool:
//!
//! - `tickets`: one row per ticket, status changes as compare-and-set updates
//! - `location_pings`: append-only, primary key `(ticket_id, sequence_no)`
//! - `media_attachments`: unique `(ticket_id, idempotency_key)`
//! - `police_stations`: the station directory
//!
//! Pings and attachments reference their ticket with `ON DELETE CASCADE`, so
//! deleting a ticket is a single statement.
//!
//! # Example
//!
//! ```ignore
//! use kawach_postgres::PostgresStore;
//!
//! let store = PostgresStore::connect("postgres://localhost/kawach", 10).await?;
//! store.migrate().await?;
//! let stores = kawach_core::Stores::from_backend(std::sync::Arc::new(store));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::PostgresStore;
