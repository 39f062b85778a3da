//! Change events published for every accepted mutation.
//!
//! Dashboards subscribe to a ticket's change feed instead of polling. Events are
//! best-effort: a subscriber that misses some recovers the current state through
//! the query façade.

use crate::types::{
    LocationPing, MediaAttachment, StationId, Ticket, TicketId, TicketStatus, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Ticket opened
    Created,
    /// Ping appended to the ledger
    LocationAppended,
    /// New media attachment recorded
    MediaAttached,
    /// Lifecycle status changed
    StatusChanged,
    /// Ticket assigned or transferred to a station
    StationAssigned,
    /// Ticket and everything under it removed
    Deleted,
}

impl ChangeKind {
    /// Metric and log label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::LocationAppended => "location_appended",
            Self::MediaAttached => "media_attached",
            Self::StatusChanged => "status_changed",
            Self::StationAssigned => "station_assigned",
            Self::Deleted => "deleted",
        }
    }
}

/// Event body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangePayload {
    /// Ticket state after creation or assignment
    Ticket {
        /// The ticket
        ticket: Ticket,
    },
    /// Ticket state after a status change
    Transition {
        /// Status before the change
        from: TicketStatus,
        /// The ticket after the change
        ticket: Ticket,
    },
    /// The appended ping
    Location {
        /// The ping
        ping: LocationPing,
    },
    /// The new attachment
    Media {
        /// The attachment
        attachment: MediaAttachment,
    },
    /// Tombstone for a deleted ticket
    Deleted {
        /// Former owner
        user_id: UserId,
        /// Station that was assigned at deletion time
        assigned_police_station_id: Option<StationId>,
    },
}

/// `{ticket_id, kind, payload}` change event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketChange {
    /// Ticket the change belongs to
    pub ticket_id: TicketId,
    /// What happened
    pub kind: ChangeKind,
    /// Event body
    pub payload: ChangePayload,
    /// Server time of the mutation
    pub occurred_at: DateTime<Utc>,
}

impl TicketChange {
    /// A ticket was opened
    #[must_use]
    pub fn created(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            kind: ChangeKind::Created,
            occurred_at: ticket.created_at,
            payload: ChangePayload::Ticket {
                ticket: ticket.clone(),
            },
        }
    }

    /// A ping was appended
    #[must_use]
    pub fn location_appended(ping: &LocationPing) -> Self {
        Self {
            ticket_id: ping.ticket_id,
            kind: ChangeKind::LocationAppended,
            occurred_at: ping.received_at,
            payload: ChangePayload::Location { ping: ping.clone() },
        }
    }

    /// A new attachment was recorded
    #[must_use]
    pub fn media_attached(attachment: &MediaAttachment) -> Self {
        Self {
            ticket_id: attachment.ticket_id,
            kind: ChangeKind::MediaAttached,
            occurred_at: attachment.uploaded_at,
            payload: ChangePayload::Media {
                attachment: attachment.clone(),
            },
        }
    }

    /// The ticket moved from `from` to its current status
    #[must_use]
    pub fn status_changed(from: TicketStatus, ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            kind: ChangeKind::StatusChanged,
            occurred_at: ticket.updated_at,
            payload: ChangePayload::Transition {
                from,
                ticket: ticket.clone(),
            },
        }
    }

    /// The ticket was assigned to its current station
    #[must_use]
    pub fn station_assigned(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            kind: ChangeKind::StationAssigned,
            occurred_at: ticket.updated_at,
            payload: ChangePayload::Ticket {
                ticket: ticket.clone(),
            },
        }
    }

    /// The ticket was deleted
    #[must_use]
    pub fn deleted(ticket: &Ticket, at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            kind: ChangeKind::Deleted,
            occurred_at: at,
            payload: ChangePayload::Deleted {
                user_id: ticket.user_id.clone(),
                assigned_police_station_id: ticket.assigned_police_station_id.clone(),
            },
        }
    }

    /// Whether this is the last event the ticket will ever produce
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match &self.payload {
            ChangePayload::Deleted { .. } => true,
            ChangePayload::Transition { ticket, .. } => ticket.is_closed(),
            _ => false,
        }
    }
}
