//! Lifecycle coordinator: the only writer path into the stores.
//!
//! Every mutation follows the same shape:
//!
//! 1. authorization pre-check (so strangers never contend for the lock)
//! 2. take the ticket's lock, retrying a bounded number of times on `Busy`
//! 3. reload and re-authorize the ticket under the lock
//! 4. one store write
//! 5. publish the change to every sink, still under the lock, so subscribers
//!    see changes in commit order
//!
//! Sinks never block: a sink that cannot take a change reports it, the
//! coordinator logs and counts the drop, and the mutation still succeeds.

use crate::feed::{ChangeFeed, ChangeStream};
use crate::locks::{KeyGuard, TicketGuard, TicketLocks, UserLocks};
use crate::metrics::{
    BUSY_REJECTIONS_TOTAL, LOCATION_PINGS_TOTAL, MEDIA_ATTACHED_TOTAL, PUBLISH_DROPPED_TOTAL,
    TICKETS_CREATED_TOTAL, TRANSITIONS_TOTAL,
};
use crate::retry::{RetryPolicy, retry_with_predicate};
use kawach_core::lifecycle::check_transition;
use kawach_core::validate::{AppendLocation, AssignStation, AttachMedia, CreateTicket};
use kawach_core::{
    AccessGuard, AttachOutcome, AttachmentId, ChangeSink, Clock, Coordinates, EngineError,
    LocationPing, MediaAttachment, NewPing, Operation, Page, Principal, SortOrder, StationId,
    StoreError, Stores, Ticket, TicketChange, TicketFilter, TicketId, TicketQuery, TicketStatus,
    UserId,
};
use std::sync::Arc;
use std::time::Duration;

/// Coordinator tuning
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Longest a single attempt waits for a ticket lock
    pub lock_wait: Duration,
    /// Retries after a `Busy` lock attempt
    pub busy_retry: RetryPolicy,
    /// Search radius for the nearest police station
    pub station_radius_km: f64,
    /// Close the user's other open tickets when they open a new one
    pub supersede_open_tickets: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(250),
            busy_retry: RetryPolicy::default(),
            station_radius_km: 10.0,
            supersede_open_tickets: true,
        }
    }
}

/// Result of opening a ticket
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedTicket {
    /// The new ticket
    pub ticket: Ticket,
    /// Ping 1, when the submission carried a location
    pub initial_location: Option<LocationPing>,
    /// Older tickets of the same user closed by this create
    pub superseded: Vec<TicketId>,
}

/// Who is asking for a mutation; `None` for engine-internal actions
type Actor<'a> = Option<(&'a Principal, Operation)>;

/// Serializes and applies every ticket mutation
pub struct LifecycleCoordinator {
    stores: Stores,
    clock: Arc<dyn Clock>,
    guard: AccessGuard,
    locks: TicketLocks,
    user_locks: UserLocks,
    feed: Arc<ChangeFeed>,
    sinks: Vec<Arc<dyn ChangeSink>>,
    config: CoordinatorConfig,
}

impl LifecycleCoordinator {
    /// Coordinator publishing to `feed` and every sink in `sinks`
    #[must_use]
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        feed: Arc<ChangeFeed>,
        sinks: Vec<Arc<dyn ChangeSink>>,
        config: CoordinatorConfig,
    ) -> Self {
        let mut all: Vec<Arc<dyn ChangeSink>> = Vec::with_capacity(sinks.len() + 1);
        all.push(feed.clone());
        all.extend(sinks);
        Self {
            stores,
            clock,
            guard: AccessGuard,
            locks: TicketLocks::new(),
            user_locks: UserLocks::new(),
            feed,
            sinks: all,
            config,
        }
    }

    /// The lock registry
    #[must_use]
    pub const fn locks(&self) -> &TicketLocks {
        &self.locks
    }

    /// The live change feed
    #[must_use]
    pub const fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Open a ticket for `command.user_id`.
    ///
    /// With an initial location the ticket is assigned to the nearest station
    /// and is stored together with the location as ping 1. Afterwards the
    /// user's other open tickets are closed when superseding is enabled. One
    /// user's creates run one at a time, so a create only ever supersedes
    /// tickets opened before it.
    ///
    /// # Errors
    ///
    /// `Denied` unless the principal is that user, `Busy`, or a store failure.
    pub async fn create_ticket(
        &self,
        principal: &Principal,
        command: CreateTicket,
    ) -> Result<CreatedTicket, EngineError> {
        self.guard
            .authorize_create(principal, &command.user_id)
            .require()?;

        let now = self.clock.now();
        let mut ticket = Ticket::open(TicketId::new(), command.user_id, now);
        let ticket_id = ticket.ticket_id;
        let user_lock = self.lock_user(&ticket.user_id, ticket_id).await?;
        let lock = self.lock(ticket_id).await?;

        let (ticket, initial_location) = match command.initial_location {
            None => (self.stores.tickets.insert(ticket).await?, None),
            Some(fix) => {
                ticket.assigned_police_station_id = self.nearest_station(fix.coordinates).await;
                let first = NewPing {
                    ticket_id,
                    coordinates: fix.coordinates,
                    recorded_at: fix.recorded_at,
                    received_at: now,
                };
                let (ticket, ping) = self.stores.tickets.insert_with_ping(ticket, first).await?;
                (ticket, Some(ping))
            }
        };

        self.publish(&TicketChange::created(&ticket));
        if let Some(ping) = &initial_location {
            self.publish(&TicketChange::location_appended(ping));
            metrics::counter!(LOCATION_PINGS_TOTAL).increment(1);
        }
        drop(lock);

        metrics::counter!(TICKETS_CREATED_TOTAL).increment(1);
        tracing::info!(
            %ticket_id,
            user_id = %ticket.user_id,
            station_id = ticket.assigned_police_station_id.as_ref().map(StationId::as_str),
            "ticket opened"
        );

        let superseded = if self.config.supersede_open_tickets {
            self.supersede_open_tickets(&ticket).await
        } else {
            Vec::new()
        };
        drop(user_lock);

        Ok(CreatedTicket {
            ticket,
            initial_location,
            superseded,
        })
    }

    /// Append a ping to the ticket's ledger.
    ///
    /// # Errors
    ///
    /// `Denied`, `TicketClosed`, `Busy`, or a store failure.
    pub async fn append_location(
        &self,
        principal: &Principal,
        command: AppendLocation,
    ) -> Result<LocationPing, EngineError> {
        let ticket_id = command.ticket_id;
        let lock = self.lock_for(principal, ticket_id, Operation::Write).await?;
        let ticket = self.load(Some((principal, Operation::Write)), ticket_id).await?;
        if ticket.is_closed() {
            return Err(EngineError::TicketClosed(ticket_id));
        }

        let ping = self
            .stores
            .ledger
            .append(NewPing {
                ticket_id,
                coordinates: command.fix.coordinates,
                recorded_at: command.fix.recorded_at,
                received_at: self.clock.now(),
            })
            .await?;

        self.publish(&TicketChange::location_appended(&ping));
        drop(lock);

        metrics::counter!(LOCATION_PINGS_TOTAL).increment(1);
        tracing::debug!(%ticket_id, sequence_no = ping.sequence_no.get(), "location appended");
        Ok(ping)
    }

    /// Attach a media reference, at most once per idempotency key.
    ///
    /// A retry with a known key returns the original record. The closed check
    /// runs first, so retries against a closed ticket fail.
    ///
    /// # Errors
    ///
    /// `Denied`, `TicketClosed`, `Busy`, or a store failure.
    pub async fn attach_media(
        &self,
        principal: &Principal,
        command: AttachMedia,
    ) -> Result<AttachOutcome, EngineError> {
        let ticket_id = command.ticket_id;
        let lock = self.lock_for(principal, ticket_id, Operation::Write).await?;
        let ticket = self.load(Some((principal, Operation::Write)), ticket_id).await?;
        if ticket.is_closed() {
            return Err(EngineError::TicketClosed(ticket_id));
        }

        let now = self.clock.now();
        let outcome = self
            .stores
            .media
            .attach(MediaAttachment {
                attachment_id: AttachmentId::new(),
                ticket_id,
                kind: command.kind,
                storage_reference: command.storage_reference.clone(),
                idempotency_key: command.idempotency_key.clone(),
                captured_at: command.captured_at.unwrap_or(now),
                uploaded_at: now,
            })
            .await?;

        match &outcome {
            AttachOutcome::Created(attachment) => {
                self.publish(&TicketChange::media_attached(attachment));
            }
            AttachOutcome::Existing(original) => {
                if original.kind != command.kind
                    || original.storage_reference != command.storage_reference
                {
                    tracing::warn!(
                        %ticket_id,
                        idempotency_key = %command.idempotency_key,
                        attachment_id = %original.attachment_id,
                        "idempotency key reused with a different payload, returning original"
                    );
                }
            }
        }
        drop(lock);

        let label = if outcome.is_new() { "created" } else { "duplicate" };
        metrics::counter!(MEDIA_ATTACHED_TOTAL, "outcome" => label).increment(1);
        tracing::debug!(
            %ticket_id,
            attachment_id = %outcome.attachment().attachment_id,
            outcome = label,
            "media attached"
        );
        Ok(outcome)
    }

    /// Close the ticket (owner or assigned station).
    ///
    /// # Errors
    ///
    /// `Denied`, `InvalidTransition` when already closed, `Busy`, or a store failure.
    pub async fn close_ticket(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        self.transition(Some((principal, Operation::Write)), ticket_id, TicketStatus::Closed)
            .await
    }

    /// Accept the ticket (assigned station only).
    ///
    /// # Errors
    ///
    /// `Denied`, `InvalidTransition` unless the ticket is open, `Busy`, or a
    /// store failure.
    pub async fn accept_ticket(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        self.transition(
            Some((principal, Operation::Accept)),
            ticket_id,
            TicketStatus::InProgress,
        )
        .await
    }

    /// Assign or transfer the ticket to a known station.
    ///
    /// # Errors
    ///
    /// `Denied`, `TicketClosed`, `NotFound` for an unknown station,
    /// `DependencyFailure` when the directory fails, `Busy`, or a store failure.
    pub async fn assign_station(
        &self,
        principal: &Principal,
        command: AssignStation,
    ) -> Result<Ticket, EngineError> {
        let ticket_id = command.ticket_id;
        let lock = self.lock_for(principal, ticket_id, Operation::Write).await?;
        let ticket = self.load(Some((principal, Operation::Write)), ticket_id).await?;
        if ticket.is_closed() {
            return Err(EngineError::TicketClosed(ticket_id));
        }

        let station = self
            .stores
            .stations
            .station(command.station_id.clone())
            .await
            .map_err(|e| directory_failure(&e))?
            .ok_or_else(|| EngineError::not_found("station", &command.station_id))?;

        let previous = ticket.assigned_police_station_id;
        let updated = self
            .stores
            .tickets
            .assign_station(ticket_id, station.station_id, command.reason, self.clock.now())
            .await?;

        self.publish(&TicketChange::station_assigned(&updated));
        drop(lock);

        tracing::info!(
            %ticket_id,
            from = previous.as_ref().map(StationId::as_str),
            to = %command.station_id,
            "ticket assigned"
        );
        Ok(updated)
    }

    /// Delete the ticket with its pings and attachments (owner only).
    ///
    /// # Errors
    ///
    /// `Denied`, `Busy`, or a store failure.
    pub async fn delete_ticket(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(principal, ticket_id, Operation::Delete).await?;
        let ticket = self.load(Some((principal, Operation::Delete)), ticket_id).await?;

        if !self.stores.tickets.delete(ticket_id).await? {
            return Err(EngineError::Denied);
        }

        self.publish(&TicketChange::deleted(&ticket, self.clock.now()));
        self.close_feeds(ticket_id);
        drop(lock);

        tracing::info!(%ticket_id, principal = %principal, "ticket deleted");
        Ok(())
    }

    /// Live change stream of the ticket.
    ///
    /// A closed ticket yields an empty stream.
    ///
    /// # Errors
    ///
    /// `Denied` or `Busy`.
    pub async fn subscribe(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
    ) -> Result<ChangeStream, EngineError> {
        let lock = self.lock_for(principal, ticket_id, Operation::Subscribe).await?;
        let ticket = self
            .load(Some((principal, Operation::Subscribe)), ticket_id)
            .await?;

        let stream: ChangeStream = if ticket.is_closed() {
            Box::pin(futures::stream::empty())
        } else {
            self.feed.subscribe(ticket_id)
        };
        drop(lock);
        Ok(stream)
    }

    async fn transition(
        &self,
        actor: Actor<'_>,
        ticket_id: TicketId,
        to: TicketStatus,
    ) -> Result<Ticket, EngineError> {
        let lock = match actor {
            Some((principal, operation)) => self.lock_for(principal, ticket_id, operation).await?,
            None => self.lock(ticket_id).await?,
        };
        let ticket = self.load(actor, ticket_id).await?;
        let from = ticket.status;
        check_transition(from, to)?;

        let updated = self
            .stores
            .tickets
            .transition(ticket_id, from, to, self.clock.now())
            .await?;

        self.publish(&TicketChange::status_changed(from, &updated));
        if updated.is_closed() {
            self.close_feeds(ticket_id);
        }
        drop(lock);

        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!(%ticket_id, %from, %to, "ticket status changed");
        Ok(updated)
    }

    async fn supersede_open_tickets(&self, current: &Ticket) -> Vec<TicketId> {
        let query = TicketQuery {
            filter: TicketFilter::Active,
            order: SortOrder::Asc,
            page: Page {
                page: 1,
                page_size: Page::MAX_SIZE,
            },
        };
        let open = match self
            .stores
            .tickets
            .list_by_user(current.user_id.clone(), query)
            .await
        {
            Ok(open) => open,
            Err(error) => {
                tracing::warn!(user_id = %current.user_id, %error, "could not list open tickets to supersede");
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for older in open.into_iter().filter(|t| t.ticket_id != current.ticket_id) {
            match self.transition(None, older.ticket_id, TicketStatus::Closed).await {
                Ok(_) => closed.push(older.ticket_id),
                Err(error) => tracing::warn!(
                    ticket_id = %older.ticket_id,
                    superseded_by = %current.ticket_id,
                    %error,
                    "could not supersede open ticket"
                ),
            }
        }
        if !closed.is_empty() {
            tracing::info!(
                ticket_id = %current.ticket_id,
                count = closed.len(),
                "superseded older open tickets"
            );
        }
        closed
    }

    async fn nearest_station(&self, at: Coordinates) -> Option<StationId> {
        match self
            .stores
            .stations
            .nearest(at, self.config.station_radius_km)
            .await
        {
            Ok(station) => station.map(|s| s.station_id),
            Err(error) => {
                tracing::warn!(%error, "station directory lookup failed, ticket stays unassigned");
                None
            }
        }
    }

    /// Pre-check access, then take the lock.
    async fn lock_for(
        &self,
        principal: &Principal,
        ticket_id: TicketId,
        operation: Operation,
    ) -> Result<TicketGuard, EngineError> {
        self.load(Some((principal, operation)), ticket_id).await?;
        self.lock(ticket_id).await
    }

    /// Take the owner's create lock; `Busy` names the ticket being opened.
    async fn lock_user(
        &self,
        user_id: &UserId,
        ticket_id: TicketId,
    ) -> Result<KeyGuard<UserId>, EngineError> {
        let wait = self.config.lock_wait;
        let result = retry_with_predicate(
            &self.config.busy_retry,
            || {
                let user_id = user_id.clone();
                async move {
                    self.user_locks
                        .try_acquire(user_id, wait)
                        .await
                        .ok_or(EngineError::Busy { ticket_id })
                }
            },
            |e| matches!(e, EngineError::Busy { .. }),
        )
        .await;
        if result.is_err() {
            metrics::counter!(BUSY_REJECTIONS_TOTAL).increment(1);
            tracing::warn!(%user_id, "user create lock stayed busy, rejecting");
        }
        result
    }

    async fn lock(&self, ticket_id: TicketId) -> Result<TicketGuard, EngineError> {
        let result = retry_with_predicate(
            &self.config.busy_retry,
            || self.locks.acquire(ticket_id, self.config.lock_wait),
            |e| matches!(e, EngineError::Busy { .. }),
        )
        .await;
        if matches!(result, Err(EngineError::Busy { .. })) {
            metrics::counter!(BUSY_REJECTIONS_TOTAL).increment(1);
            tracing::warn!(%ticket_id, "ticket lock stayed busy, rejecting");
        }
        result
    }

    /// Fetch the ticket; with an actor, also authorize it.
    ///
    /// A missing ticket is `Denied` for principals so that absence and refusal
    /// look the same.
    async fn load(&self, actor: Actor<'_>, ticket_id: TicketId) -> Result<Ticket, EngineError> {
        let ticket = self.stores.tickets.get(ticket_id).await?;
        match actor {
            Some((principal, operation)) => {
                let ticket = ticket.ok_or(EngineError::Denied)?;
                self.guard.authorize(principal, &ticket, operation).require()?;
                Ok(ticket)
            }
            None => ticket.ok_or_else(|| EngineError::not_found("ticket", ticket_id)),
        }
    }

    fn publish(&self, change: &TicketChange) {
        for sink in &self.sinks {
            if let Err(error) = sink.publish(change) {
                metrics::counter!(PUBLISH_DROPPED_TOTAL, "sink" => sink.name()).increment(1);
                tracing::warn!(
                    ticket_id = %change.ticket_id,
                    kind = change.kind.as_str(),
                    sink = sink.name(),
                    %error,
                    "change publication dropped"
                );
            }
        }
    }

    fn close_feeds(&self, ticket_id: TicketId) {
        for sink in &self.sinks {
            sink.close_ticket_feed(ticket_id);
        }
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("locks", &self.locks)
            .field("sinks", &self.sinks.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn directory_failure(error: &StoreError) -> EngineError {
    EngineError::DependencyFailure {
        dependency: "station_directory",
        reason: error.to_string(),
    }
}
