//! Query façade: authorized reads over the three stores.
//!
//! Reads take no ticket lock. Each store write is atomic, so a read sees a
//! ticket either before or after a mutation, never half of one. Summaries are
//! composed from the stores on every call and never cached.

use futures::{Stream, TryStreamExt};
use kawach_core::{
    AccessGuard, AttachmentId, EngineError, LocationLedger, LocationPing, MediaAttachment,
    MediaKind, Operation, Principal, SeqRange, SequenceNo, StationId, StatusView, Stores, Summary,
    Ticket, TicketDetail, TicketId, TicketQuery, UserId,
};
use std::pin::Pin;
use std::sync::Arc;

/// Default number of pings fetched per history page
pub const DEFAULT_HISTORY_BATCH: u32 = 500;

/// Stream of pings produced by [`LocationHistory::stream`]
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<LocationPing, EngineError>> + Send>>;

/// Read side of the engine
#[derive(Clone, Debug)]
pub struct QueryFacade {
    stores: Stores,
    guard: AccessGuard,
    history_batch: u32,
}

impl QueryFacade {
    /// Façade over `stores`, paging history `history_batch` pings at a time
    #[must_use]
    pub fn new(stores: Stores, history_batch: u32) -> Self {
        Self {
            stores,
            guard: AccessGuard,
            history_batch: history_batch.max(1),
        }
    }

    /// Current status of the ticket.
    ///
    /// # Errors
    ///
    /// `Denied` when the principal may not read the ticket (or it does not exist).
    pub async fn get_status(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<StatusView, EngineError> {
        let ticket = self.readable(principal, ticket_id).await?;
        Ok(StatusView::from(&ticket))
    }

    /// Most recent ping, if any.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn get_latest_location(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<Option<LocationPing>, EngineError> {
        self.readable(principal, ticket_id).await?;
        Ok(self.stores.ledger.latest(ticket_id).await?)
    }

    /// Status, latest location, ping count and attachment counts.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn get_summary(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<Summary, EngineError> {
        let ticket = self.readable(principal, ticket_id).await?;
        let (latest_location, media) = futures::try_join!(
            self.stores.ledger.latest(ticket_id),
            self.stores.media.counts(ticket_id),
        )?;

        Ok(Summary {
            ticket_id,
            status: ticket.status,
            assigned_police_station_id: ticket.assigned_police_station_id,
            location_count: latest_location.as_ref().map_or(0, |p| p.sequence_no.get()),
            latest_location,
            media,
            created_at: ticket.created_at,
            closed_at: ticket.closed_at,
        })
    }

    /// Ticket with its whole ledger and every attachment.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn get_full_detail(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<TicketDetail, EngineError> {
        let ticket = self.readable(principal, ticket_id).await?;
        let history = self.history(ticket_id, SeqRange::all());
        let (locations, media) = futures::try_join!(history.collect(), async {
            self.stores
                .media
                .list(ticket_id, None)
                .await
                .map_err(EngineError::from)
        })?;

        Ok(TicketDetail {
            ticket,
            locations,
            media,
        })
    }

    /// Tickets of `user_id`; only that user may list them.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn list_by_user(
        &self,
        principal: &Principal,
        user_id: UserId,
        query: TicketQuery,
    ) -> Result<Vec<Ticket>, EngineError> {
        self.guard.authorize_user_listing(principal, &user_id).require()?;
        Ok(self.stores.tickets.list_by_user(user_id, query).await?)
    }

    /// Tickets assigned to `station_id`; only that station may list them.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn list_by_station(
        &self,
        principal: &Principal,
        station_id: StationId,
        query: TicketQuery,
    ) -> Result<Vec<Ticket>, EngineError> {
        self.guard
            .authorize_station_listing(principal, &station_id)
            .require()?;
        Ok(self.stores.tickets.list_by_station(station_id, query).await?)
    }

    /// Lazy, restartable history over `range`.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure while authorizing.
    pub async fn location_history(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
        range: SeqRange,
    ) -> Result<LocationHistory, EngineError> {
        self.readable(principal, ticket_id).await?;
        Ok(self.history(ticket_id, range))
    }

    /// Attachments of the ticket, optionally of one kind.
    ///
    /// # Errors
    ///
    /// `Denied`, or a store failure.
    pub async fn list_media(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
        kind: Option<MediaKind>,
    ) -> Result<Vec<MediaAttachment>, EngineError> {
        self.readable(principal, ticket_id).await?;
        Ok(self.stores.media.list(ticket_id, kind).await?)
    }

    /// One attachment of the ticket.
    ///
    /// # Errors
    ///
    /// `Denied`, `NotFound` for an unknown attachment, or a store failure.
    pub async fn get_attachment(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
        attachment_id: AttachmentId,
    ) -> Result<MediaAttachment, EngineError> {
        self.readable(principal, ticket_id).await?;
        self.stores
            .media
            .get(ticket_id, attachment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("attachment", attachment_id))
    }

    /// Round-trip to the ticket store without touching any ticket.
    ///
    /// # Errors
    ///
    /// `DependencyFailure` when the backend does not answer.
    pub async fn probe(&self) -> Result<(), EngineError> {
        self.stores.tickets.get(TicketId::new()).await?;
        Ok(())
    }

    fn history(&self, ticket_id: TicketId, range: SeqRange) -> LocationHistory {
        LocationHistory {
            ledger: Arc::clone(&self.stores.ledger),
            ticket_id,
            range,
            batch: self.history_batch,
        }
    }

    async fn readable(&self, principal: &Principal, ticket_id: TicketId) -> Result<Ticket, EngineError> {
        let ticket = self
            .stores
            .tickets
            .get(ticket_id)
            .await?
            .ok_or(EngineError::Denied)?;
        self.guard
            .authorize(principal, &ticket, Operation::Read)
            .require()?;
        Ok(ticket)
    }
}

/// A ticket's location history over a range.
///
/// Nothing is read until [`stream`](Self::stream) is polled. Each call to
/// `stream` starts over from the backend. An open upper bound is pinned to the
/// latest ping when the stream starts, so the walk ends even while new pings
/// keep arriving.
#[derive(Clone)]
pub struct LocationHistory {
    ledger: Arc<dyn LocationLedger>,
    ticket_id: TicketId,
    range: SeqRange,
    batch: u32,
}

impl LocationHistory {
    /// Ticket this history belongs to
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// Pings in ascending sequence order
    #[must_use]
    pub fn stream(&self) -> HistoryStream {
        let ledger = Arc::clone(&self.ledger);
        let ticket_id = self.ticket_id;
        let range = self.range;
        let batch = self.batch;

        Box::pin(async_stream::try_stream! {
            let upper = match range.to {
                Some(to) => Some(to),
                None => ledger
                    .latest(ticket_id)
                    .await
                    .map_err(EngineError::from)?
                    .map(|ping| ping.sequence_no),
            };

            if let Some(upper) = upper {
                let mut cursor = range.from.unwrap_or(SequenceNo::FIRST);
                while cursor <= upper {
                    let page = ledger
                        .page(ticket_id, SeqRange { from: Some(cursor), to: Some(upper) }, batch)
                        .await
                        .map_err(EngineError::from)?;
                    let Some(last) = page.last().map(|ping| ping.sequence_no) else {
                        break;
                    };
                    for ping in page {
                        yield ping;
                    }
                    cursor = last.next();
                }
            }
        })
    }

    /// Read the whole range into memory.
    ///
    /// # Errors
    ///
    /// The first store failure.
    pub async fn collect(&self) -> Result<Vec<LocationPing>, EngineError> {
        self.stream().try_collect().await
    }
}

impl std::fmt::Debug for LocationHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationHistory")
            .field("ticket_id", &self.ticket_id)
            .field("range", &self.range)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}
