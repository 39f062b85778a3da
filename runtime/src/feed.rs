//! Per-ticket live change feed.
//!
//! One `tokio::sync::broadcast` channel per ticket that has subscribers.
//! Publishing never waits: a subscriber that falls more than `capacity` events
//! behind sees a [`FeedEvent::Lagged`] marker and should refetch state through
//! the query façade.

use futures::Stream;
use kawach_core::{ChangeSink, PublishError, TicketChange, TicketId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

/// Item of a live subscription
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// A change, in mutation order
    Change(TicketChange),
    /// The subscriber fell behind and `skipped` changes were discarded
    Lagged {
        /// How many changes were lost
        skipped: u64,
    },
}

/// Stream returned by [`ChangeFeed::subscribe`]
pub type ChangeStream = Pin<Box<dyn Stream<Item = FeedEvent> + Send>>;

/// Broadcast hub for ticket changes
pub struct ChangeFeed {
    capacity: usize,
    channels: Mutex<HashMap<TicketId, broadcast::Sender<TicketChange>>>,
}

impl ChangeFeed {
    /// Feed buffering up to `capacity` changes per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the changes of `ticket_id`.
    ///
    /// The stream ends after the ticket's terminal change (close or delete) or
    /// when the feed for the ticket is closed.
    pub fn subscribe(&self, ticket_id: TicketId) -> ChangeStream {
        let mut rx = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(ticket_id)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let terminal = change.is_terminal();
                        yield FeedEvent::Change(change);
                        if terminal {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(%ticket_id, skipped, "live subscriber lagged");
                        yield FeedEvent::Lagged { skipped };
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Number of live subscribers of `ticket_id`
    #[must_use]
    pub fn subscriber_count(&self, ticket_id: TicketId) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of tickets with an open channel
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("capacity", &self.capacity)
            .field("open_channels", &self.open_channels())
            .finish()
    }
}

impl ChangeSink for ChangeFeed {
    fn name(&self) -> &'static str {
        "change_feed"
    }

    fn publish(&self, change: &TicketChange) -> Result<(), PublishError> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(&change.ticket_id) else {
            return Ok(());
        };
        if sender.send(change.clone()).is_err() {
            // Every subscriber went away.
            channels.remove(&change.ticket_id);
        }
        Ok(())
    }

    fn close_ticket_feed(&self, ticket_id: TicketId) {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ticket_id);
        if removed.is_some() {
            tracing::debug!(%ticket_id, "live feed closed");
        }
    }
}
