//! # Kawach Runtime
//!
//! The moving parts of the ticket engine, built on the contracts in
//! `kawach-core`:
//!
//! - **[`LifecycleCoordinator`]**: the single writer path, one critical section
//!   per ticket
//! - **[`QueryFacade`]**: authorized reads and lazy location history
//! - **[`ChangeFeed`]**: per-ticket live broadcast for dashboards
//! - **[`NotificationRelay`]**: bounded hand-off to the notification dispatcher
//! - **[`Engine`]**: validator, coordinator and queries behind one handle
//!
//! ## Example
//!
//! ```ignore
//! use kawach_runtime::{Engine, EngineConfig};
//! use kawach_core::{Principal, Stores, UserId};
//!
//! let engine = Engine::builder(Stores::from_backend(store)).build();
//! let user = Principal::User(UserId::new("user-1"));
//!
//! let created = engine.create_ticket(&user, "user-1", Default::default()).await?;
//! let ticket_id = created.ticket.ticket_id.to_string();
//! engine.append_location(&user, &ticket_id, ping).await?;
//! let summary = engine.get_summary(&user, &ticket_id).await?;
//! ```

pub mod coordinator;
pub mod engine;
pub mod feed;
pub mod locks;
pub mod metrics;
pub mod query;
pub mod relay;
pub mod retry;

pub use coordinator::{CoordinatorConfig, CreatedTicket, LifecycleCoordinator};
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use feed::{ChangeFeed, ChangeStream, FeedEvent};
pub use locks::{KeyGuard, KeyedLocks, TicketGuard, TicketLocks, UserLocks};
pub use query::{HistoryStream, LocationHistory, QueryFacade};
pub use relay::NotificationRelay;
