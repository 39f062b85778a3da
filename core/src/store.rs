//! Persistence contracts.
//!
//! The engine talks to four stores. They may live in one database or in
//! separate ones; the coordinator is their only writer.
//!
//! - [`TicketStore`]: one row per ticket
//! - [`LocationLedger`]: append-only pings, numbered per ticket
//! - [`MediaIndex`]: attachments, unique per `(ticket_id, idempotency_key)`
//! - [`StationDirectory`]: read-only station lookup
//!
//! Methods return boxed futures so the traits stay dyn-compatible and the
//! engine can hold `Arc<dyn TicketStore>` regardless of backend.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `kawach-postgres`): production backend
//! - `InMemoryStore` (in `kawach-testing`): tests and single-node development

use crate::error::StoreError;
use crate::types::{
    AttachmentId, Coordinates, LocationPing, MediaAttachment, MediaCounts, MediaKind, NewPing,
    PoliceStation, SeqRange, StationId, Ticket, TicketId, TicketQuery, TicketStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by every store method
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Ticket rows.
pub trait TicketStore: Send + Sync {
    /// Insert a freshly opened ticket.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the id is taken, [`StoreError::Backend`] on I/O failure.
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Ticket>;

    /// Insert a freshly opened ticket together with its first ping, which
    /// gets sequence number 1. Either both are stored or neither is.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the id is taken, [`StoreError::Backend`] on I/O failure.
    fn insert_with_ping(&self, ticket: Ticket, first: NewPing)
    -> StoreFuture<'_, (Ticket, LocationPing)>;

    /// Fetch a ticket; `None` when absent.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Tickets owned by `user_id`, filtered, ordered and paged by `query`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn list_by_user(&self, user_id: UserId, query: TicketQuery) -> StoreFuture<'_, Vec<Ticket>>;

    /// Tickets assigned to `station_id`, filtered, ordered and paged by `query`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn list_by_station(
        &self,
        station_id: StationId,
        query: TicketQuery,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Compare-and-set the status from `expected` to `to`.
    ///
    /// Stamps `updated_at`, and `closed_at` when `to` is closed.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent, [`StoreError::Conflict`] when the
    /// stored status is not `expected` or the pair is not a legal transition.
    fn transition(
        &self,
        ticket_id: TicketId,
        expected: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket>;

    /// Record `station_id` as the assigned station.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when absent, [`StoreError::TicketClosed`] when closed.
    fn assign_station(
        &self,
        ticket_id: TicketId,
        station_id: StationId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket>;

    /// Remove the ticket together with its pings and attachments.
    ///
    /// Returns whether a ticket was removed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn delete(&self, ticket_id: TicketId) -> StoreFuture<'_, bool>;
}

/// Append-only location pings.
pub trait LocationLedger: Send + Sync {
    /// Append a ping, assigning the next sequence number.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the ticket is absent,
    /// [`StoreError::TicketClosed`] when it is closed.
    fn append(&self, ping: NewPing) -> StoreFuture<'_, LocationPing>;

    /// Ping with the highest sequence number.
    ///
    /// Sequence numbers are gap-free from 1, so this is also the ping count.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn latest(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<LocationPing>>;

    /// Up to `limit` pings inside `range`, ascending by sequence number.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn page(
        &self,
        ticket_id: TicketId,
        range: SeqRange,
        limit: u32,
    ) -> StoreFuture<'_, Vec<LocationPing>>;
}

/// Result of [`MediaIndex::attach`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A new record was stored
    Created(MediaAttachment),
    /// The key was already used; this is the original record
    Existing(MediaAttachment),
}

impl AttachOutcome {
    /// The stored record
    #[must_use]
    pub const fn attachment(&self) -> &MediaAttachment {
        match self {
            Self::Created(a) | Self::Existing(a) => a,
        }
    }

    /// Take the stored record
    #[must_use]
    pub fn into_attachment(self) -> MediaAttachment {
        match self {
            Self::Created(a) | Self::Existing(a) => a,
        }
    }

    /// Whether this call created the record
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Media attachment references.
pub trait MediaIndex: Send + Sync {
    /// Record `attachment` unless its idempotency key was seen for this ticket.
    ///
    /// The closed check comes before the key lookup: a retry against a closed
    /// ticket fails even if the key was recorded earlier.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the ticket is absent,
    /// [`StoreError::TicketClosed`] when it is closed.
    fn attach(&self, attachment: MediaAttachment) -> StoreFuture<'_, AttachOutcome>;

    /// One attachment of the ticket.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn get(
        &self,
        ticket_id: TicketId,
        attachment_id: AttachmentId,
    ) -> StoreFuture<'_, Option<MediaAttachment>>;

    /// Attachments of the ticket in upload order, optionally of one kind.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn list(
        &self,
        ticket_id: TicketId,
        kind: Option<MediaKind>,
    ) -> StoreFuture<'_, Vec<MediaAttachment>>;

    /// Attachment counts per kind.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn counts(&self, ticket_id: TicketId) -> StoreFuture<'_, MediaCounts>;
}

/// Police station lookup.
pub trait StationDirectory: Send + Sync {
    /// Station by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn station(&self, station_id: StationId) -> StoreFuture<'_, Option<PoliceStation>>;

    /// Closest station within `radius_km` of `at`, by great-circle distance.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on I/O failure.
    fn nearest(&self, at: Coordinates, radius_km: f64) -> StoreFuture<'_, Option<PoliceStation>>;
}

/// The four stores the engine works with
#[derive(Clone)]
pub struct Stores {
    /// Ticket rows
    pub tickets: Arc<dyn TicketStore>,
    /// Location pings
    pub ledger: Arc<dyn LocationLedger>,
    /// Media references
    pub media: Arc<dyn MediaIndex>,
    /// Station lookup
    pub stations: Arc<dyn StationDirectory>,
}

impl Stores {
    /// Use one backend for all four stores
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: TicketStore + LocationLedger + MediaIndex + StationDirectory + 'static,
    {
        Self {
            tickets: backend.clone(),
            ledger: backend.clone(),
            media: backend.clone(),
            stations: backend,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
