//! Notification dispatcher used when no push gateway is wired in.

use kawach_core::{DispatchError, NotificationDispatcher, TicketChange};
use std::future::Future;
use std::pin::Pin;

/// Writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(
        &self,
        change: TicketChange,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                ticket_id = %change.ticket_id,
                kind = change.kind.as_str(),
                occurred_at = %change.occurred_at,
                "notification"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kawach_core::{Ticket, TicketId, UserId};

    #[tokio::test]
    async fn always_accepts() {
        let ticket = Ticket::open(TicketId::new(), UserId::new("u1"), Utc::now());
        LogDispatcher
            .dispatch(TicketChange::created(&ticket))
            .await
            .unwrap();
    }
}
