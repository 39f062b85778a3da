//! The assembled engine.
//!
//! [`Engine`] is what transports (HTTP, tests) talk to. It takes raw
//! submissions, runs them through the [`Validator`], and hands the typed
//! commands to the [`LifecycleCoordinator`] or the [`QueryFacade`].
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::builder(Stores::from_backend(store))
//!     .config(EngineConfig::default())
//!     .sink(relay)
//!     .build();
//!
//! let created = engine
//!     .create_ticket(&principal, "user-1", CreateTicketSubmission::default())
//!     .await?;
//! ```

use crate::coordinator::{CoordinatorConfig, CreatedTicket, LifecycleCoordinator};
use crate::feed::{ChangeFeed, ChangeStream};
use crate::query::{DEFAULT_HISTORY_BATCH, LocationHistory, QueryFacade};
use crate::retry::RetryPolicy;
use kawach_core::validate::{
    AssignSubmission, CreateTicketSubmission, HistorySubmission, ListSubmission,
    LocationSubmission, MediaSubmission,
};
use kawach_core::{
    AttachOutcome, ChangeSink, Clock, EngineError, LocationPing, MediaAttachment, Page, Principal,
    SortOrder, StatusView, Stores, Summary, SystemClock, Ticket, TicketDetail, TicketFilter,
    TicketQuery, Validator,
};
use std::sync::Arc;
use std::time::Duration;

/// Engine tuning
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Longest a single attempt waits for a ticket lock
    pub lock_wait: Duration,
    /// Retries after a `Busy` lock attempt
    pub busy_retries: usize,
    /// Delay before the first `Busy` retry; doubles each time
    pub busy_backoff: Duration,
    /// Changes buffered per live subscriber before it lags
    pub feed_capacity: usize,
    /// Search radius for the nearest police station
    pub station_radius_km: f64,
    /// Close a user's other open tickets when they open a new one
    pub supersede_open_tickets: bool,
    /// Pings fetched per history page
    pub history_batch: u32,
    /// How far client timestamps may run ahead of the server
    pub max_clock_skew: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(250),
            busy_retries: 2,
            busy_backoff: Duration::from_millis(25),
            feed_capacity: 256,
            station_radius_km: 10.0,
            supersede_open_tickets: true,
            history_batch: DEFAULT_HISTORY_BATCH,
            max_clock_skew: chrono::Duration::seconds(30),
        }
    }
}

impl EngineConfig {
    fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            lock_wait: self.lock_wait,
            busy_retry: RetryPolicy::builder()
                .max_retries(self.busy_retries)
                .initial_delay(self.busy_backoff)
                .max_delay(self.lock_wait.max(self.busy_backoff))
                .build(),
            station_radius_km: self.station_radius_km,
            supersede_open_tickets: self.supersede_open_tickets,
        }
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    stores: Stores,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    sinks: Vec<Arc<dyn ChangeSink>>,
}

impl EngineBuilder {
    /// Use `clock` instead of the system clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default configuration
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish changes to `sink` in addition to the live feed
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Assemble the engine
    #[must_use]
    pub fn build(self) -> Engine {
        let feed = Arc::new(ChangeFeed::new(self.config.feed_capacity));
        let coordinator = LifecycleCoordinator::new(
            self.stores.clone(),
            Arc::clone(&self.clock),
            feed,
            self.sinks,
            self.config.coordinator(),
        );
        Engine {
            coordinator: Arc::new(coordinator),
            queries: QueryFacade::new(self.stores, self.config.history_batch),
            validator: Validator::new(self.config.max_clock_skew),
            clock: self.clock,
        }
    }
}

/// Validator, coordinator and query façade behind one handle.
///
/// Cheap to clone; clones share locks, feed and stores.
#[derive(Clone)]
pub struct Engine {
    coordinator: Arc<LifecycleCoordinator>,
    queries: QueryFacade,
    validator: Validator,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Start building an engine over `stores`
    #[must_use]
    pub fn builder(stores: Stores) -> EngineBuilder {
        EngineBuilder {
            stores,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            sinks: Vec::new(),
        }
    }

    /// The write side
    #[must_use]
    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    /// The read side
    #[must_use]
    pub const fn queries(&self) -> &QueryFacade {
        &self.queries
    }

    /// The submission validator
    #[must_use]
    pub const fn validator(&self) -> &Validator {
        &self.validator
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Open a ticket for `user_id`.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn create_ticket(
        &self,
        principal: &Principal,
        user_id: &str,
        submission: CreateTicketSubmission,
    ) -> Result<CreatedTicket, EngineError> {
        let command = self
            .validator
            .create_ticket(user_id, submission, self.clock.now())?;
        self.coordinator.create_ticket(principal, command).await
    }

    /// Append a ping.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `TicketClosed`, `Busy`, or a store failure.
    pub async fn append_location(
        &self,
        principal: &Principal,
        ticket_id: &str,
        submission: LocationSubmission,
    ) -> Result<LocationPing, EngineError> {
        let command = self
            .validator
            .append_location(ticket_id, submission, self.clock.now())?;
        self.coordinator.append_location(principal, command).await
    }

    /// Attach a media reference.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `TicketClosed`, `Busy`, or a store failure.
    pub async fn attach_media(
        &self,
        principal: &Principal,
        ticket_id: &str,
        submission: MediaSubmission,
    ) -> Result<AttachOutcome, EngineError> {
        let command = self
            .validator
            .attach_media(ticket_id, submission, self.clock.now())?;
        self.coordinator.attach_media(principal, command).await
    }

    /// Close a ticket.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `InvalidTransition`, `Busy`, or a store failure.
    pub async fn close_ticket(
        &self,
        principal: &Principal,
        ticket_id: &str,
    ) -> Result<Ticket, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.coordinator.close_ticket(principal, ticket_id).await
    }

    /// Accept a ticket.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `InvalidTransition`, `Busy`, or a store failure.
    pub async fn accept_ticket(
        &self,
        principal: &Principal,
        ticket_id: &str,
    ) -> Result<Ticket, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.coordinator.accept_ticket(principal, ticket_id).await
    }

    /// Assign or transfer a ticket.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `TicketClosed`, `NotFound`, `Busy`, or a
    /// dependency failure.
    pub async fn assign_station(
        &self,
        principal: &Principal,
        ticket_id: &str,
        submission: AssignSubmission,
    ) -> Result<Ticket, EngineError> {
        let command = self.validator.assign_station(ticket_id, submission)?;
        self.coordinator.assign_station(principal, command).await
    }

    /// Delete a ticket and everything under it.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `Busy`, or a store failure.
    pub async fn delete_ticket(&self, principal: &Principal, ticket_id: &str) -> Result<(), EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.coordinator.delete_ticket(principal, ticket_id).await
    }

    /// Live change stream of a ticket.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or `Busy`.
    pub async fn subscribe(
        &self,
        principal: &Principal,
        ticket_id: &str,
    ) -> Result<ChangeStream, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.coordinator.subscribe(principal, ticket_id).await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Ticket status.
    ///
    /// # Errors
    ///
    /// `Validation` or `Denied`.
    pub async fn get_status(&self, principal: &Principal, ticket_id: &str) -> Result<StatusView, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.queries.get_status(principal, ticket_id).await
    }

    /// Latest ping.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn get_latest_location(
        &self,
        principal: &Principal,
        ticket_id: &str,
    ) -> Result<Option<LocationPing>, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.queries.get_latest_location(principal, ticket_id).await
    }

    /// Ticket summary.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn get_summary(&self, principal: &Principal, ticket_id: &str) -> Result<Summary, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.queries.get_summary(principal, ticket_id).await
    }

    /// Ticket with full history and attachments.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn get_full_detail(
        &self,
        principal: &Principal,
        ticket_id: &str,
    ) -> Result<TicketDetail, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        self.queries.get_full_detail(principal, ticket_id).await
    }

    /// The user's tickets; defaults to every status, newest first.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn list_by_user(
        &self,
        principal: &Principal,
        user_id: &str,
        submission: ListSubmission,
    ) -> Result<Vec<Ticket>, EngineError> {
        let user_id = self.validator.user_id(user_id)?;
        let query = self.validator.ticket_query(submission, TicketQuery::default())?;
        self.queries.list_by_user(principal, user_id, query).await
    }

    /// The station's tickets; defaults to active ones, oldest first.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn list_by_station(
        &self,
        principal: &Principal,
        station_id: &str,
        submission: ListSubmission,
    ) -> Result<Vec<Ticket>, EngineError> {
        let station_id = self.validator.station_id(station_id)?;
        let defaults = TicketQuery {
            filter: TicketFilter::Active,
            order: SortOrder::Asc,
            page: Page::default(),
        };
        let query = self.validator.ticket_query(submission, defaults)?;
        self.queries.list_by_station(principal, station_id, query).await
    }

    /// Location history over a range.
    ///
    /// # Errors
    ///
    /// `Validation` or `Denied`.
    pub async fn location_history(
        &self,
        principal: &Principal,
        ticket_id: &str,
        submission: HistorySubmission,
    ) -> Result<LocationHistory, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        let range = self.validator.seq_range(submission)?;
        self.queries.location_history(principal, ticket_id, range).await
    }

    /// Attachments, optionally of one kind.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, or a store failure.
    pub async fn list_media(
        &self,
        principal: &Principal,
        ticket_id: &str,
        kind: Option<&str>,
    ) -> Result<Vec<MediaAttachment>, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        let kind = self.validator.media_kind_filter(kind)?;
        self.queries.list_media(principal, ticket_id, kind).await
    }

    /// One attachment.
    ///
    /// # Errors
    ///
    /// `Validation`, `Denied`, `NotFound`, or a store failure.
    pub async fn get_attachment(
        &self,
        principal: &Principal,
        ticket_id: &str,
        attachment_id: &str,
    ) -> Result<MediaAttachment, EngineError> {
        let ticket_id = self.validator.ticket_id(ticket_id)?;
        let attachment_id = self.validator.attachment_id(attachment_id)?;
        self.queries
            .get_attachment(principal, ticket_id, attachment_id)
            .await
    }

    /// Whether the backing stores answer; used by readiness probes.
    ///
    /// # Errors
    ///
    /// `DependencyFailure` when the backend is unreachable.
    pub async fn probe(&self) -> Result<(), EngineError> {
        self.queries.probe().await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("coordinator", &self.coordinator)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
