//! # Kawach Core
//!
//! Domain types and pure rules for the Kawach emergency ticket engine.
//!
//! A user in distress opens an emergency **ticket**; the mobile client streams
//! location pings and media references into it while the police station assigned
//! to the ticket watches it from a dashboard. This crate holds everything that
//! does not need a runtime:
//!
//! - [`types`]: identifiers, tickets, pings, attachments, stations and read views
//! - [`error`]: the engine error taxonomy
//! - [`validate`]: the event validator (raw submissions → typed commands)
//! - [`lifecycle`]: the ticket state machine
//! - [`access`]: the access guard
//! - [`change`]: change events published to live subscribers
//! - [`store`]: persistence contracts (ticket store, location ledger, media index,
//!   station directory)
//! - [`environment`]: injected collaborators (clock, change sinks, notification dispatch)
//! - [`geo`]: great-circle helpers for nearest-station search
//!
//! ## Ticket lifecycle
//!
//! ```text
//!            accept            close
//!   OPEN ─────────────▶ IN_PROGRESS ─────▶ CLOSED
//!     │                                      ▲
//!     └──────────────── close ───────────────┘
//! ```
//!
//! `CLOSED` is terminal: a closed ticket accepts no pings, no media and no
//! further transitions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod change;
pub mod environment;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod store;
pub mod types;
pub mod validate;

pub use access::{Access, AccessGuard, Operation, Principal};
pub use change::{ChangeKind, ChangePayload, TicketChange};
pub use environment::{
    ChangeSink, Clock, DispatchError, NotificationDispatcher, PublishError, SystemClock,
};
pub use error::{EngineError, StoreError, ValidationError};
pub use store::{AttachOutcome, LocationLedger, MediaIndex, StationDirectory, Stores, TicketStore};
pub use types::*;
pub use validate::Validator;
