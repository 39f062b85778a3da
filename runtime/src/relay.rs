//! Bounded hand-off from the coordinator to a [`NotificationDispatcher`].
//!
//! The coordinator publishes under the ticket lock, so the relay only
//! `try_send`s into a bounded queue; a background task drains it and calls the
//! dispatcher. When the queue is full the notification is dropped and counted.
//! Pings and media are not relayed.

use kawach_core::{ChangeKind, ChangeSink, NotificationDispatcher, PublishError, TicketChange};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// [`ChangeSink`] feeding a notification dispatcher
#[derive(Debug, Clone)]
pub struct NotificationRelay {
    tx: mpsc::Sender<TicketChange>,
}

impl NotificationRelay {
    /// Start the relay task on the current runtime.
    ///
    /// The task stops once every clone of the relay is dropped and the queue is
    /// drained.
    pub fn spawn(
        dispatcher: Arc<dyn NotificationDispatcher>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<TicketChange>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let ticket_id = change.ticket_id;
                let kind = change.kind;
                if let Err(error) = dispatcher.dispatch(change).await {
                    tracing::warn!(%ticket_id, kind = kind.as_str(), %error, "notification dispatch failed");
                }
            }
            tracing::debug!("notification relay stopped");
        });
        (Self { tx }, handle)
    }

    const fn relays(kind: ChangeKind) -> bool {
        matches!(
            kind,
            ChangeKind::Created
                | ChangeKind::StatusChanged
                | ChangeKind::StationAssigned
                | ChangeKind::Deleted
        )
    }
}

impl ChangeSink for NotificationRelay {
    fn name(&self) -> &'static str {
        "notification_relay"
    }

    fn publish(&self, change: &TicketChange) -> Result<(), PublishError> {
        if !Self::relays(change.kind) {
            return Ok(());
        }
        self.tx.try_send(change.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}
