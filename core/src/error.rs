//! Error taxonomy for the ticket engine.
//!
//! Three layers:
//!
//! - [`ValidationError`]: a raw submission was malformed. Nothing was touched.
//! - [`StoreError`]: what a persistence backend reports.
//! - [`EngineError`]: what callers of the engine see. Store errors are folded
//!   into it with `From`.
//!
//! Only [`EngineError::Busy`] and [`EngineError::DependencyFailure`] are worth
//! retrying; every other variant is a final answer.

use crate::types::{TicketId, TicketStatus};
use thiserror::Error;

/// A submission failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field
    pub field: &'static str,
    /// Human readable reason
    pub reason: String,
}

impl ValidationError {
    /// Build a validation error for `field`
    #[must_use]
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// The field is required but absent
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

/// Errors surfaced by the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Submission rejected by the validator.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Referenced resource does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of resource (`"attachment"`, `"station"`, ...)
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Principal may not perform the operation.
    ///
    /// Also returned for tickets that do not exist, so that a caller cannot probe
    /// for ticket ids.
    #[error("access denied")]
    Denied,

    /// Transition not in the lifecycle table.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: TicketStatus,
        /// Requested status
        to: TicketStatus,
    },

    /// Ticket is closed and accepts no further input.
    #[error("ticket {0} is closed")]
    TicketClosed(TicketId),

    /// Per-ticket lock could not be acquired in time.
    #[error("ticket {ticket_id} is busy, retry later")]
    Busy {
        /// Contended ticket
        ticket_id: TicketId,
    },

    /// A collaborator (backend, directory, dispatcher) failed.
    #[error("{dependency} failed: {reason}")]
    DependencyFailure {
        /// Which collaborator
        dependency: &'static str,
        /// What went wrong
        reason: String,
    },
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`]
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::DependencyFailure { .. })
    }
}

/// Errors reported by persistence backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Row does not exist.
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    /// Write refused because the ticket is closed.
    #[error("ticket {0} is closed")]
    TicketClosed(TicketId),

    /// A compare-and-set lost against a concurrent writer.
    #[error("conflicting write on ticket {ticket_id}: {reason}")]
    Conflict {
        /// Ticket whose row changed underneath the writer
        ticket_id: TicketId,
        /// What did not match
        reason: String,
    },

    /// Backend failure (connection, query, decoding).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(ticket_id) => Self::not_found("ticket", ticket_id),
            StoreError::TicketClosed(ticket_id) => Self::TicketClosed(ticket_id),
            StoreError::Conflict { ticket_id, .. } => Self::Busy { ticket_id },
            StoreError::Backend(reason) => Self::DependencyFailure {
                dependency: "store",
                reason,
            },
        }
    }
}
