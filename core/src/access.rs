//! Access guard.
//!
//! A ticket is visible to exactly two principals: the user who owns it and the
//! police station currently assigned to it. Everyone else is denied, and an
//! unassigned ticket is visible to its owner only.

use crate::error::EngineError;
use crate::types::{StationId, Ticket, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated caller, as resolved by the identity gateway
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Principal {
    /// A mobile app user
    User(UserId),
    /// A police station dashboard
    Station(StationId),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Station(id) => write!(f, "station:{id}"),
        }
    }
}

/// What the principal wants to do with a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Status, location, summary, detail, media listing
    Read,
    /// Append ping, attach media, close, assign
    Write,
    /// Move OPEN to IN_PROGRESS
    Accept,
    /// Hard delete
    Delete,
    /// Live change feed
    Subscribe,
}

/// Outcome of an authorization check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Go ahead
    Allowed,
    /// Refused
    Denied,
}

impl Access {
    /// Turn the decision into a `Result`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Denied`] when access was refused.
    pub const fn require(self) -> Result<(), EngineError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied => Err(EngineError::Denied),
        }
    }

    const fn from_bool(allowed: bool) -> Self {
        if allowed { Self::Allowed } else { Self::Denied }
    }
}

/// Stateless authorization rules
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessGuard;

impl AccessGuard {
    /// Decide whether `principal` may perform `operation` on `ticket`
    #[must_use]
    pub fn authorize(&self, principal: &Principal, ticket: &Ticket, operation: Operation) -> Access {
        let allowed = match principal {
            Principal::User(user_id) => {
                ticket.is_owned_by(user_id) && operation != Operation::Accept
            }
            Principal::Station(station_id) => {
                ticket.is_assigned_to(station_id) && operation != Operation::Delete
            }
        };
        Access::from_bool(allowed)
    }

    /// Only the user themself opens a ticket in their name
    #[must_use]
    pub fn authorize_create(&self, principal: &Principal, user_id: &UserId) -> Access {
        Access::from_bool(matches!(principal, Principal::User(id) if id == user_id))
    }

    /// A user lists only their own tickets
    #[must_use]
    pub fn authorize_user_listing(&self, principal: &Principal, user_id: &UserId) -> Access {
        Access::from_bool(matches!(principal, Principal::User(id) if id == user_id))
    }

    /// A station lists only the tickets assigned to it
    #[must_use]
    pub fn authorize_station_listing(&self, principal: &Principal, station_id: &StationId) -> Access {
        Access::from_bool(matches!(principal, Principal::Station(id) if id == station_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TicketId;
    use chrono::Utc;

    const ALL_OPS: [Operation; 5] = [
        Operation::Read,
        Operation::Write,
        Operation::Accept,
        Operation::Delete,
        Operation::Subscribe,
    ];

    fn ticket(owner: &str, station: Option<&str>) -> Ticket {
        let mut ticket = Ticket::open(TicketId::new(), UserId::new(owner), Utc::now());
        ticket.assigned_police_station_id = station.map(StationId::new);
        ticket
    }

    #[test]
    fn owner_may_do_everything_but_accept() {
        let guard = AccessGuard;
        let owner = Principal::User(UserId::new("alice"));
        let t = ticket("alice", Some("ps-1"));

        for op in ALL_OPS {
            let expected = if op == Operation::Accept {
                Access::Denied
            } else {
                Access::Allowed
            };
            assert_eq!(guard.authorize(&owner, &t, op), expected, "{op:?}");
        }
    }

    #[test]
    fn assigned_station_reads_writes_and_accepts() {
        let guard = AccessGuard;
        let station = Principal::Station(StationId::new("ps-1"));
        let t = ticket("alice", Some("ps-1"));

        assert_eq!(guard.authorize(&station, &t, Operation::Read), Access::Allowed);
        assert_eq!(guard.authorize(&station, &t, Operation::Write), Access::Allowed);
        assert_eq!(guard.authorize(&station, &t, Operation::Accept), Access::Allowed);
        assert_eq!(guard.authorize(&station, &t, Operation::Subscribe), Access::Allowed);
        assert_eq!(guard.authorize(&station, &t, Operation::Delete), Access::Denied);
    }

    #[test]
    fn other_principals_are_denied() {
        let guard = AccessGuard;
        let t = ticket("alice", Some("ps-1"));
        let stranger = Principal::User(UserId::new("mallory"));
        let other_station = Principal::Station(StationId::new("ps-2"));

        for op in ALL_OPS {
            assert_eq!(guard.authorize(&stranger, &t, op), Access::Denied);
            assert_eq!(guard.authorize(&other_station, &t, op), Access::Denied);
        }
    }

    #[test]
    fn unassigned_ticket_is_owner_only() {
        let guard = AccessGuard;
        let t = ticket("alice", None);
        let station = Principal::Station(StationId::new("ps-1"));

        assert_eq!(guard.authorize(&station, &t, Operation::Read), Access::Denied);
        assert_eq!(
            guard.authorize(&Principal::User(UserId::new("alice")), &t, Operation::Read),
            Access::Allowed
        );
    }

    #[test]
    fn listings_are_self_only() {
        let guard = AccessGuard;
        let alice = UserId::new("alice");
        let ps = StationId::new("ps-1");

        assert_eq!(
            guard.authorize_user_listing(&Principal::User(alice.clone()), &alice),
            Access::Allowed
        );
        assert_eq!(
            guard.authorize_user_listing(&Principal::Station(ps.clone()), &alice),
            Access::Denied
        );
        assert_eq!(
            guard.authorize_station_listing(&Principal::Station(ps.clone()), &ps),
            Access::Allowed
        );
        assert_eq!(
            guard.authorize_station_listing(&Principal::Station(StationId::new("ps-9")), &ps),
            Access::Denied
        );
    }

    #[test]
    fn stations_cannot_open_tickets() {
        let guard = AccessGuard;
        let alice = UserId::new("alice");
        assert_eq!(
            guard.authorize_create(&Principal::User(alice.clone()), &alice),
            Access::Allowed
        );
        assert_eq!(
            guard.authorize_create(&Principal::User(UserId::new("bob")), &alice),
            Access::Denied
        );
        assert_eq!(
            guard.authorize_create(&Principal::Station(StationId::new("alice")), &alice),
            Access::Denied
        );
    }

    #[test]
    fn denied_requires_to_error() {
        assert_eq!(Access::Denied.require(), Err(EngineError::Denied));
        assert_eq!(Access::Allowed.require(), Ok(()));
    }
}
