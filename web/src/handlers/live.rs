//! WebSocket change feed for dashboards.
//!
//! ```text
//! Dashboard         live handler              Engine
//!    │                   │                       │
//!    ├─ GET /live ──────>│                       │
//!    │                   ├─ subscribe() ────────>│  (403 before upgrade)
//!    │<─ 101 ────────────┤                       │
//!    │                   │<── change ────────────┤
//!    │<─ {"type":"change"}                       │
//!    │                   │<── close / delete ────┤
//!    │<─ Close ──────────┤                       │
//! ```
//!
//! **Server → Client:**
//! ```json
//! { "type": "change", "change": { "kind": "location_appended", ... } }
//! { "type": "lagged", "skipped": 12 }
//! ```
//!
//! A `lagged` message means changes were dropped for this subscriber; the
//! dashboard should refetch the summary. The socket closes after the
//! ticket's terminal change. Client messages other than `Close` are ignored.

use crate::error::AppError;
use crate::extractors::AuthenticatedPrincipal;
use crate::state::AppState;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use kawach_core::TicketChange;
use kawach_runtime::{ChangeStream, FeedEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Message sent to a live subscriber
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage<'a> {
    /// A change, in mutation order
    Change {
        /// The change
        change: &'a TicketChange,
    },
    /// Changes were dropped for this subscriber
    Lagged {
        /// How many
        skipped: u64,
    },
}

impl<'a> From<&'a FeedEvent> for LiveMessage<'a> {
    fn from(event: &'a FeedEvent) -> Self {
        match event {
            FeedEvent::Change(change) => Self::Change { change },
            FeedEvent::Lagged { skipped } => Self::Lagged { skipped: *skipped },
        }
    }
}

/// Upgrade to a WebSocket streaming the ticket's changes.
///
/// The subscription is made before the upgrade, so access errors come back
/// as ordinary HTTP errors.
///
/// # Errors
///
/// 403 when the caller may not watch the ticket.
pub async fn subscribe(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let changes = state.engine.subscribe(&principal, &ticket_id).await?;
    info!(%ticket_id, %principal, "live subscriber connected");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, changes, ticket_id)))
}

async fn handle_socket(socket: WebSocket, mut changes: ChangeStream, ticket_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = changes.next().await {
            let text = match serde_json::to_string(&LiveMessage::from(&event)) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize change");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                // Client went away
                return;
            }
        }
        // Terminal change delivered or feed closed
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                debug!("client requested close");
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!(%ticket_id, "live subscriber disconnected");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kawach_core::{Ticket, TicketId, UserId};

    #[test]
    fn messages_are_tagged() {
        let ticket = Ticket::open(TicketId::new(), UserId::new("u1"), Utc::now());
        let event = FeedEvent::Change(TicketChange::created(&ticket));
        let json = serde_json::to_value(LiveMessage::from(&event)).unwrap();
        assert_eq!(json["type"], "change");
        assert_eq!(json["change"]["kind"], "created");

        let lagged = FeedEvent::Lagged { skipped: 16 };
        assert_eq!(
            serde_json::to_string(&LiveMessage::from(&lagged)).unwrap(),
            r#"{"type":"lagged","skipped":16}"#
        );
    }
}
