//! # Kawach Testing
//!
//! Test support for the Kawach ticket engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: every store contract over one `RwLock`, with fault injection
//! - Mocks for the engine's collaborators (clock, change sinks, dispatcher)
//! - Fixtures for principals, submissions and a fast-failing engine
//!
//! ## Example
//!
//! ```ignore
//! use kawach_testing::{fixtures, InMemoryStore};
//!
//! #[tokio::test]
//! async fn user_opens_a_ticket() {
//!     let store = InMemoryStore::new();
//!     let engine = fixtures::engine(&store);
//!
//!     let created = engine
//!         .create_ticket(&fixtures::user("u1"), "u1", Default::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(created.ticket.status, TicketStatus::Open);
//! }
//! ```

pub mod fixtures;
pub mod memory;

use chrono::{DateTime, Utc};
use kawach_core::environment::Clock;

/// Mock implementations of the engine's collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use kawach_core::{
        ChangeKind, ChangeSink, DispatchError, NotificationDispatcher, PublishError, TicketChange,
        TicketId,
    };
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle and give
    /// another to the engine.
    ///
    /// # Example
    ///
    /// ```
    /// use kawach_testing::mocks::FixedClock;
    /// use kawach_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - before, Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Default fixed clock for tests (2025-01-01 12:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Change sink that remembers everything published to it
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink {
        changes: Arc<Mutex<Vec<TicketChange>>>,
        closed: Arc<Mutex<Vec<TicketId>>>,
    }

    impl RecordingSink {
        /// Empty sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every change seen so far, in publish order
        #[must_use]
        pub fn changes(&self) -> Vec<TicketChange> {
            self.changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Kinds of the changes seen for `ticket_id`
        #[must_use]
        pub fn kinds_for(&self, ticket_id: TicketId) -> Vec<ChangeKind> {
            self.changes()
                .into_iter()
                .filter(|c| c.ticket_id == ticket_id)
                .map(|c| c.kind)
                .collect()
        }

        /// Tickets whose feeds were closed
        #[must_use]
        pub fn closed_feeds(&self) -> Vec<TicketId> {
            self.closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl ChangeSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn publish(&self, change: &TicketChange) -> Result<(), PublishError> {
            self.changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(change.clone());
            Ok(())
        }

        fn close_ticket_feed(&self, ticket_id: TicketId) {
            self.closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ticket_id);
        }
    }

    /// Change sink whose buffer is always full
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FullSink;

    impl ChangeSink for FullSink {
        fn name(&self) -> &'static str {
            "full"
        }

        fn publish(&self, _change: &TicketChange) -> Result<(), PublishError> {
            Err(PublishError::Full)
        }
    }

    /// Notification dispatcher that records deliveries, or fails on demand
    #[derive(Debug, Clone, Default)]
    pub struct RecordingDispatcher {
        delivered: Arc<Mutex<Vec<TicketChange>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingDispatcher {
        /// Dispatcher that accepts everything
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Start or stop rejecting deliveries
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Changes delivered so far
        #[must_use]
        pub fn delivered(&self) -> Vec<TicketChange> {
            self.delivered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn dispatch(
            &self,
            change: TicketChange,
        ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(DispatchError("dispatcher offline".into()));
                }
                self.delivered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(change);
                Ok(())
            })
        }
    }
}

pub use memory::InMemoryStore;
pub use mocks::{FixedClock, FullSink, RecordingDispatcher, RecordingSink, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kawach_core::{ChangeSink, Ticket, TicketChange, TicketId, UserId};

    #[test]
    fn fixed_clock_only_moves_when_advanced() {
        let clock = test_clock();
        let shared = clock.clone();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        shared.advance(chrono::Duration::minutes(1));
        assert_eq!(clock.now() - start, chrono::Duration::minutes(1));
    }

    #[test]
    fn recording_sink_keeps_publish_order() {
        let sink = RecordingSink::new();
        let ticket = Ticket::open(TicketId::new(), UserId::new("u1"), test_clock().now());

        sink.publish(&TicketChange::created(&ticket)).unwrap();
        sink.close_ticket_feed(ticket.ticket_id);

        assert_eq!(
            sink.kinds_for(ticket.ticket_id),
            vec![kawach_core::ChangeKind::Created]
        );
        assert_eq!(sink.closed_feeds(), vec![ticket.ticket_id]);
    }

    #[tokio::test]
    async fn recording_dispatcher_can_fail() {
        use kawach_core::NotificationDispatcher;

        let dispatcher = RecordingDispatcher::new();
        let ticket = Ticket::open(TicketId::new(), UserId::new("u1"), test_clock().now());

        dispatcher
            .dispatch(TicketChange::created(&ticket))
            .await
            .unwrap();
        dispatcher.set_failing(true);
        assert!(
            dispatcher
                .dispatch(TicketChange::created(&ticket))
                .await
                .is_err()
        );
        assert_eq!(dispatcher.delivered().len(), 1);
    }
}
