//! In-memory backend implementing every store contract.
//!
//! One `RwLock` guards all state, so each operation is atomic with respect to
//! every other. Used by the test suites and by the server when no database is
//! configured.

use kawach_core::geo::{haversine_km, search_box};
use kawach_core::store::StoreFuture;
use kawach_core::{
    AttachOutcome, AttachmentId, Coordinates, LocationLedger, LocationPing, MediaAttachment,
    MediaCounts, MediaIndex, MediaKind, NewPing, PoliceStation, SeqRange, SortOrder,
    StationDirectory, StationId, StoreError, Ticket, TicketId, TicketQuery, TicketStatus,
    TicketStore, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct TicketRecord {
    /// Insertion order, breaks `created_at` ties in listings
    position: u64,
    ticket: Ticket,
    pings: Vec<LocationPing>,
    media: Vec<MediaAttachment>,
}

#[derive(Default)]
struct State {
    next_position: u64,
    tickets: HashMap<TicketId, TicketRecord>,
    stations: HashMap<StationId, PoliceStation>,
}

#[derive(Default)]
struct Faults {
    fail_next_append: AtomicBool,
    fail_directory: AtomicBool,
}

/// HashMap-backed store for tests and single-node development
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a police station
    pub fn register_station(&self, station: PoliceStation) {
        self.write()
            .stations
            .insert(station.station_id.clone(), station);
    }

    /// Make the next ledger append, or ticket insert with a first ping, fail
    /// with a backend error
    pub fn fail_next_append(&self) {
        self.faults.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Make station lookups fail until switched off again
    pub fn fail_station_directory(&self, fail: bool) {
        self.faults.fail_directory.store(fail, Ordering::SeqCst);
    }

    /// Number of stored tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.read().tickets.len()
    }

    /// Number of pings stored for `ticket_id`
    #[must_use]
    pub fn ping_count(&self, ticket_id: TicketId) -> usize {
        self.read()
            .tickets
            .get(&ticket_id)
            .map_or(0, |r| r.pings.len())
    }

    /// Number of attachments stored for `ticket_id`
    #[must_use]
    pub fn media_count(&self, ticket_id: TicketId) -> usize {
        self.read()
            .tickets
            .get(&ticket_id)
            .map_or(0, |r| r.media.len())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn list_tickets<F>(&self, query: TicketQuery, include: F) -> Vec<Ticket>
    where
        F: Fn(&Ticket) -> bool,
    {
        let state = self.read();
        let mut matching: Vec<&TicketRecord> = state
            .tickets
            .values()
            .filter(|r| include(&r.ticket) && query.filter.matches(r.ticket.status))
            .collect();
        matching.sort_by_key(|r| (r.ticket.created_at, r.position));
        if query.order == SortOrder::Desc {
            matching.reverse();
        }
        matching
            .into_iter()
            .skip(usize::try_from(query.page.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.page.limit()).unwrap_or(usize::MAX))
            .map(|r| r.ticket.clone())
            .collect()
    }

    fn directory_available(&self) -> Result<(), StoreError> {
        if self.faults.fail_directory.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("station directory unavailable".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("InMemoryStore")
            .field("tickets", &state.tickets.len())
            .field("stations", &state.stations.len())
            .finish()
    }
}

fn ready<'a, T: Send + 'a>(result: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

fn open_record(state: &mut State, ticket_id: TicketId) -> Result<&mut TicketRecord, StoreError> {
    let record = state
        .tickets
        .get_mut(&ticket_id)
        .ok_or(StoreError::NotFound(ticket_id))?;
    if record.ticket.is_closed() {
        return Err(StoreError::TicketClosed(ticket_id));
    }
    Ok(record)
}

fn insert_record(
    state: &mut State,
    ticket: &Ticket,
    pings: Vec<LocationPing>,
) -> Result<(), StoreError> {
    if state.tickets.contains_key(&ticket.ticket_id) {
        return Err(StoreError::Conflict {
            ticket_id: ticket.ticket_id,
            reason: "ticket id already exists".into(),
        });
    }
    let position = state.next_position;
    state.next_position += 1;
    state.tickets.insert(
        ticket.ticket_id,
        TicketRecord {
            position,
            ticket: ticket.clone(),
            pings,
            media: Vec::new(),
        },
    );
    Ok(())
}

impl TicketStore for InMemoryStore {
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Ticket> {
        let result = insert_record(&mut self.write(), &ticket, Vec::new()).map(|()| ticket);
        ready(result)
    }

    fn insert_with_ping(
        &self,
        ticket: Ticket,
        first: NewPing,
    ) -> StoreFuture<'_, (Ticket, LocationPing)> {
        let mut state = self.write();
        let result = if self.faults.fail_next_append.swap(false, Ordering::SeqCst) {
            Err(StoreError::Backend("injected append failure".into()))
        } else {
            let ping = first.into_ping(kawach_core::SequenceNo::FIRST);
            insert_record(&mut state, &ticket, vec![ping.clone()]).map(|()| (ticket, ping))
        };
        ready(result)
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        let ticket = self.read().tickets.get(&ticket_id).map(|r| r.ticket.clone());
        ready(Ok(ticket))
    }

    fn list_by_user(&self, user_id: UserId, query: TicketQuery) -> StoreFuture<'_, Vec<Ticket>> {
        ready(Ok(self.list_tickets(query, |t| t.user_id == user_id)))
    }

    fn list_by_station(
        &self,
        station_id: StationId,
        query: TicketQuery,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        ready(Ok(self.list_tickets(query, |t| t.is_assigned_to(&station_id))))
    }

    fn transition(
        &self,
        ticket_id: TicketId,
        expected: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket> {
        let mut state = self.write();
        let result = match state.tickets.get_mut(&ticket_id) {
            None => Err(StoreError::NotFound(ticket_id)),
            Some(record) if record.ticket.status != expected => Err(StoreError::Conflict {
                ticket_id,
                reason: format!("expected {expected}, found {}", record.ticket.status),
            }),
            Some(record) => {
                let mut updated = record.ticket.clone();
                match updated.apply_transition(to, at) {
                    Ok(()) => {
                        record.ticket = updated.clone();
                        Ok(updated)
                    }
                    Err(e) => Err(StoreError::Conflict {
                        ticket_id,
                        reason: e.to_string(),
                    }),
                }
            }
        };
        ready(result)
    }

    fn assign_station(
        &self,
        ticket_id: TicketId,
        station_id: StationId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket> {
        let mut state = self.write();
        let result = open_record(&mut state, ticket_id).map(|record| {
            record.ticket.assigned_police_station_id = Some(station_id);
            record.ticket.transfer_reason = reason;
            record.ticket.updated_at = at;
            record.ticket.clone()
        });
        ready(result)
    }

    fn delete(&self, ticket_id: TicketId) -> StoreFuture<'_, bool> {
        let removed = self.write().tickets.remove(&ticket_id).is_some();
        ready(Ok(removed))
    }
}

impl LocationLedger for InMemoryStore {
    fn append(&self, ping: NewPing) -> StoreFuture<'_, LocationPing> {
        let mut state = self.write();
        let result = open_record(&mut state, ping.ticket_id).and_then(|record| {
            if self.faults.fail_next_append.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend("injected append failure".into()));
            }
            let next = record
                .pings
                .last()
                .map_or(kawach_core::SequenceNo::FIRST, |p| p.sequence_no.next());
            let stored = ping.into_ping(next);
            record.pings.push(stored.clone());
            Ok(stored)
        });
        ready(result)
    }

    fn latest(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<LocationPing>> {
        let latest = self
            .read()
            .tickets
            .get(&ticket_id)
            .and_then(|r| r.pings.last().cloned());
        ready(Ok(latest))
    }

    fn page(
        &self,
        ticket_id: TicketId,
        range: SeqRange,
        limit: u32,
    ) -> StoreFuture<'_, Vec<LocationPing>> {
        let page = self
            .read()
            .tickets
            .get(&ticket_id)
            .map(|r| {
                r.pings
                    .iter()
                    .filter(|p| range.contains(p.sequence_no))
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ready(Ok(page))
    }
}

impl MediaIndex for InMemoryStore {
    fn attach(&self, attachment: MediaAttachment) -> StoreFuture<'_, AttachOutcome> {
        let mut state = self.write();
        let result = open_record(&mut state, attachment.ticket_id).map(|record| {
            if let Some(existing) = record
                .media
                .iter()
                .find(|m| m.idempotency_key == attachment.idempotency_key)
            {
                AttachOutcome::Existing(existing.clone())
            } else {
                record.media.push(attachment.clone());
                AttachOutcome::Created(attachment)
            }
        });
        ready(result)
    }

    fn get(
        &self,
        ticket_id: TicketId,
        attachment_id: AttachmentId,
    ) -> StoreFuture<'_, Option<MediaAttachment>> {
        let found = self.read().tickets.get(&ticket_id).and_then(|r| {
            r.media
                .iter()
                .find(|m| m.attachment_id == attachment_id)
                .cloned()
        });
        ready(Ok(found))
    }

    fn list(
        &self,
        ticket_id: TicketId,
        kind: Option<MediaKind>,
    ) -> StoreFuture<'_, Vec<MediaAttachment>> {
        let list = self
            .read()
            .tickets
            .get(&ticket_id)
            .map(|r| {
                r.media
                    .iter()
                    .filter(|m| kind.is_none_or(|k| m.kind == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ready(Ok(list))
    }

    fn counts(&self, ticket_id: TicketId) -> StoreFuture<'_, MediaCounts> {
        let mut counts = MediaCounts::default();
        if let Some(record) = self.read().tickets.get(&ticket_id) {
            for attachment in &record.media {
                counts.record(attachment.kind);
            }
        }
        ready(Ok(counts))
    }
}

impl StationDirectory for InMemoryStore {
    fn station(&self, station_id: StationId) -> StoreFuture<'_, Option<PoliceStation>> {
        let result = self
            .directory_available()
            .map(|()| self.read().stations.get(&station_id).cloned());
        ready(result)
    }

    fn nearest(&self, at: Coordinates, radius_km: f64) -> StoreFuture<'_, Option<PoliceStation>> {
        let result = self.directory_available().map(|()| {
            let window = search_box(at, radius_km);
            self.read()
                .stations
                .values()
                .filter_map(|station| {
                    let position = Coordinates::new(station.latitude, station.longitude).ok()?;
                    if !window.contains(position) {
                        return None;
                    }
                    let distance = haversine_km(at, position);
                    (distance <= radius_km).then_some((distance, station))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, station)| station.clone())
        });
        ready(result)
    }
}
