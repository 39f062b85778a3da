//! The ticket state machine.
//!
//! | from \ to   | OPEN | IN_PROGRESS | CLOSED |
//! |-------------|------|-------------|--------|
//! | OPEN        |  ✗   |      ✓      |   ✓    |
//! | IN_PROGRESS |  ✗   |      ✗      |   ✓    |
//! | CLOSED      |  ✗   |      ✗      |   ✗    |
//!
//! Self-transitions are rejected like every other pair outside the table.

use crate::error::EngineError;
use crate::types::{Ticket, TicketStatus};
use chrono::{DateTime, Utc};

impl TicketStatus {
    /// Whether the lifecycle allows moving from `self` to `to`
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::InProgress) | (Self::Open, Self::Closed) | (Self::InProgress, Self::Closed)
        )
    }
}

/// Check a transition against the table.
///
/// # Errors
///
/// [`EngineError::InvalidTransition`] when the pair is not allowed.
pub const fn check_transition(from: TicketStatus, to: TicketStatus) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

impl Ticket {
    /// Move the ticket to `to`, stamping `updated_at` and `closed_at`.
    ///
    /// The ticket is left untouched when the transition is rejected.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] when the pair is not allowed.
    pub fn apply_transition(&mut self, to: TicketStatus, at: DateTime<Utc>) -> Result<(), EngineError> {
        check_transition(self.status, to)?;
        self.status = to;
        self.updated_at = at;
        if to == TicketStatus::Closed {
            self.closed_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{TicketId, UserId};
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = TicketStatus> {
        prop_oneof![
            Just(TicketStatus::Open),
            Just(TicketStatus::InProgress),
            Just(TicketStatus::Closed),
        ]
    }

    #[test]
    fn table_has_three_allowed_and_six_rejected_pairs() {
        let mut allowed = 0;
        let mut rejected = 0;
        for from in TicketStatus::ALL {
            for to in TicketStatus::ALL {
                if from.can_transition_to(to) {
                    allowed += 1;
                } else {
                    rejected += 1;
                }
            }
        }
        assert_eq!(allowed, 3);
        assert_eq!(rejected, 6);
    }

    #[test]
    fn closing_stamps_closed_at() {
        let created = Utc::now();
        let mut ticket = Ticket::open(TicketId::new(), UserId::new("u-1"), created);
        let later = created + chrono::Duration::seconds(5);

        ticket.apply_transition(TicketStatus::Closed, later).unwrap();

        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(ticket.closed_at, Some(later));
        assert_eq!(ticket.updated_at, later);
    }

    #[test]
    fn accepting_leaves_closed_at_empty() {
        let mut ticket = Ticket::open(TicketId::new(), UserId::new("u-1"), Utc::now());
        ticket.apply_transition(TicketStatus::InProgress, Utc::now()).unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);
        assert!(ticket.closed_at.is_none());
    }

    proptest! {
        #[test]
        fn rejected_transitions_leave_ticket_unchanged(from in any_status(), to in any_status()) {
            let now = Utc::now();
            let mut ticket = Ticket::open(TicketId::new(), UserId::new("owner"), now);
            ticket.status = from;
            if from == TicketStatus::Closed {
                ticket.closed_at = Some(now);
            }
            let before = ticket.clone();

            let result = ticket.apply_transition(to, now + chrono::Duration::seconds(1));

            if from.can_transition_to(to) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(ticket.status, to);
                prop_assert_eq!(ticket.closed_at.is_some(), to == TicketStatus::Closed);
            } else {
                prop_assert_eq!(result, Err(EngineError::InvalidTransition { from, to }));
                prop_assert_eq!(ticket, before);
            }
        }

        #[test]
        fn closed_is_terminal(to in any_status()) {
            prop_assert!(!TicketStatus::Closed.can_transition_to(to));
        }
    }
}
