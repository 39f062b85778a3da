//! Injected collaborators.
//!
//! Everything the engine needs from the outside world sits behind a trait so
//! tests can swap in deterministic fakes (see `kawach-testing`).

use crate::change::TicketChange;
use crate::types::TicketId;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a change could not be handed to a sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Buffer full; the event was dropped.
    #[error("sink buffer is full")]
    Full,
    /// Sink shut down.
    #[error("sink is closed")]
    Closed,
    /// Anything else.
    #[error("publish failed: {0}")]
    Other(String),
}

/// Receiver of change events.
///
/// `publish` is called while the coordinator holds the ticket's lock, so it
/// must return immediately: queue or drop, never wait on a consumer.
pub trait ChangeSink: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Hand over one change without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the change was dropped. The coordinator
    /// logs the error and carries on.
    fn publish(&self, change: &TicketChange) -> Result<(), PublishError>;

    /// The ticket will never produce another change
    fn close_ticket_feed(&self, _ticket_id: TicketId) {}
}

/// Why a notification could not be delivered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Best-effort outbound notifications (push, SMS, emergency contacts).
///
/// Delivery itself is owned by an external service; implementations forward
/// the change and report whether the hand-off worked.
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver a notification about `change`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the downstream service refused or failed.
    fn dispatch(
        &self,
        change: TicketChange,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
