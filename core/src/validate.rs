//! Event validator.
//!
//! Raw submissions arrive as loosely typed, serde-deserializable structs where
//! every field is optional. [`Validator`] checks them and produces the typed
//! commands the coordinator consumes, so nothing past this module ever sees an
//! out-of-range coordinate or a malformed id. Validation has no side effects.

use crate::error::ValidationError;
use crate::types::{
    AttachmentId, Coordinates, IdempotencyKey, MediaKind, Page, SeqRange, SequenceNo, SortOrder,
    StationId, TicketFilter, TicketId, TicketQuery, UserId,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// Longest accepted user or station id
pub const MAX_ID_LEN: usize = 128;
/// Longest accepted idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
/// Longest accepted storage reference, in bytes
pub const MAX_STORAGE_REFERENCE_LEN: usize = 2048;
/// Longest accepted transfer reason, in characters
pub const MAX_TRANSFER_REASON_LEN: usize = 1024;
/// Largest sequence number a history bound may name; pings are stored as `BIGINT`
pub const MAX_SEQUENCE: u64 = i64::MAX.unsigned_abs();

// ============================================================================
// Raw submissions
// ============================================================================

/// A location fix as sent by the client
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LocationSubmission {
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
    /// Client time of the fix
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Body of a create-ticket request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateTicketSubmission {
    /// First location, stored as ping 1 when present
    #[serde(default)]
    pub initial_location: Option<LocationSubmission>,
}

/// Body of an attach-media request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MediaSubmission {
    /// `AUDIO`, `VIDEO` or `IMAGE`
    pub kind: Option<String>,
    /// Pointer returned by object storage
    pub storage_reference: Option<String>,
    /// Retry token; the HTTP layer fills it from the `Idempotency-Key` header
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Client time of the capture; defaults to the upload time
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// Body of an assign/transfer request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AssignSubmission {
    /// Station receiving the ticket
    pub station_id: Option<String>,
    /// Why the ticket moves
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query string of a ticket listing
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListSubmission {
    /// `active`, `inactive` or `all`
    #[serde(default, rename = "type")]
    pub filter: Option<String>,
    /// `asc` or `desc`
    #[serde(default)]
    pub sort_order: Option<String>,
    /// One-based page number
    #[serde(default)]
    pub page: Option<i64>,
    /// Items per page
    #[serde(default)]
    pub page_size: Option<i64>,
}

/// Query string of a location history request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HistorySubmission {
    /// First sequence number, inclusive
    #[serde(default)]
    pub from: Option<u64>,
    /// Last sequence number, inclusive
    #[serde(default)]
    pub to: Option<u64>,
}

// ============================================================================
// Typed commands
// ============================================================================

/// A validated location fix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationFix {
    /// Position
    pub coordinates: Coordinates,
    /// Client time of the fix
    pub recorded_at: DateTime<Utc>,
}

/// Open a ticket
#[derive(Clone, Debug, PartialEq)]
pub struct CreateTicket {
    /// Owner of the new ticket
    pub user_id: UserId,
    /// Optional first ping
    pub initial_location: Option<LocationFix>,
}

/// Append a ping
#[derive(Clone, Debug, PartialEq)]
pub struct AppendLocation {
    /// Target ticket
    pub ticket_id: TicketId,
    /// The fix
    pub fix: LocationFix,
}

/// Attach a media reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachMedia {
    /// Target ticket
    pub ticket_id: TicketId,
    /// Media kind
    pub kind: MediaKind,
    /// Pointer returned by object storage
    pub storage_reference: String,
    /// Retry token
    pub idempotency_key: IdempotencyKey,
    /// Client capture time
    pub captured_at: Option<DateTime<Utc>>,
}

/// Assign or transfer a ticket to a station
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignStation {
    /// Target ticket
    pub ticket_id: TicketId,
    /// Receiving station
    pub station_id: StationId,
    /// Transfer reason
    pub reason: Option<String>,
}

// ============================================================================
// Validator
// ============================================================================

/// Turns raw submissions into typed commands
#[derive(Clone, Debug)]
pub struct Validator {
    max_clock_skew: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Duration::seconds(30))
    }
}

impl Validator {
    /// Validator tolerating client clocks up to `max_clock_skew` ahead of the server
    #[must_use]
    pub const fn new(max_clock_skew: Duration) -> Self {
        Self { max_clock_skew }
    }

    /// Parse a ticket reference.
    ///
    /// # Errors
    ///
    /// Fails when `raw` is not a UUID.
    pub fn ticket_id(&self, raw: &str) -> Result<TicketId, ValidationError> {
        parse_uuid("ticket_id", raw).map(TicketId::from_uuid)
    }

    /// Parse an attachment reference.
    ///
    /// # Errors
    ///
    /// Fails when `raw` is not a UUID.
    pub fn attachment_id(&self, raw: &str) -> Result<AttachmentId, ValidationError> {
        parse_uuid("attachment_id", raw).map(AttachmentId::from_uuid)
    }

    /// Check a user id.
    ///
    /// # Errors
    ///
    /// Fails when the id is empty, too long or contains whitespace.
    pub fn user_id(&self, raw: &str) -> Result<UserId, ValidationError> {
        check_external_id("user_id", raw).map(|()| UserId::new(raw))
    }

    /// Check a station id.
    ///
    /// # Errors
    ///
    /// Fails when the id is empty, too long or contains whitespace.
    pub fn station_id(&self, raw: &str) -> Result<StationId, ValidationError> {
        check_external_id("station_id", raw).map(|()| StationId::new(raw))
    }

    /// Validate a create-ticket submission.
    ///
    /// # Errors
    ///
    /// Fails on a malformed user id or initial location.
    pub fn create_ticket(
        &self,
        user_id: &str,
        submission: CreateTicketSubmission,
        now: DateTime<Utc>,
    ) -> Result<CreateTicket, ValidationError> {
        let user_id = self.user_id(user_id)?;
        let initial_location = submission
            .initial_location
            .map(|raw| self.location_fix(raw, now))
            .transpose()?;
        Ok(CreateTicket {
            user_id,
            initial_location,
        })
    }

    /// Validate an add-location submission.
    ///
    /// # Errors
    ///
    /// Fails on a malformed ticket reference, missing or out-of-range
    /// coordinates, or a fix dated in the future.
    pub fn append_location(
        &self,
        ticket_id: &str,
        submission: LocationSubmission,
        now: DateTime<Utc>,
    ) -> Result<AppendLocation, ValidationError> {
        Ok(AppendLocation {
            ticket_id: self.ticket_id(ticket_id)?,
            fix: self.location_fix(submission, now)?,
        })
    }

    /// Validate an add-media submission.
    ///
    /// # Errors
    ///
    /// Fails on a malformed ticket reference, unknown kind, bad storage
    /// reference or idempotency key, or a capture time in the future.
    pub fn attach_media(
        &self,
        ticket_id: &str,
        submission: MediaSubmission,
        now: DateTime<Utc>,
    ) -> Result<AttachMedia, ValidationError> {
        let ticket_id = self.ticket_id(ticket_id)?;
        let kind = MediaKind::parse(
            submission
                .kind
                .as_deref()
                .ok_or_else(|| ValidationError::missing("kind"))?,
        )?;

        let storage_reference = submission
            .storage_reference
            .ok_or_else(|| ValidationError::missing("storage_reference"))?;
        check_storage_reference(&storage_reference)?;

        let key = submission
            .idempotency_key
            .ok_or_else(|| ValidationError::missing("idempotency_key"))?;
        check_idempotency_key(&key)?;

        if let Some(captured_at) = submission.captured_at {
            self.check_not_future("captured_at", captured_at, now)?;
        }

        Ok(AttachMedia {
            ticket_id,
            kind,
            storage_reference,
            idempotency_key: IdempotencyKey::new(key),
            captured_at: submission.captured_at,
        })
    }

    /// Validate an assign/transfer submission.
    ///
    /// # Errors
    ///
    /// Fails on a malformed ticket or station reference or an oversized reason.
    pub fn assign_station(
        &self,
        ticket_id: &str,
        submission: AssignSubmission,
    ) -> Result<AssignStation, ValidationError> {
        let ticket_id = self.ticket_id(ticket_id)?;
        let station_id = self.station_id(
            submission
                .station_id
                .as_deref()
                .ok_or_else(|| ValidationError::missing("station_id"))?,
        )?;
        let reason = submission
            .reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty());
        if let Some(reason) = &reason {
            if reason.chars().count() > MAX_TRANSFER_REASON_LEN {
                return Err(ValidationError::new(
                    "reason",
                    format!("must be at most {MAX_TRANSFER_REASON_LEN} characters"),
                ));
            }
        }
        Ok(AssignStation {
            ticket_id,
            station_id,
            reason,
        })
    }

    /// Validate a listing query, filling unset fields from `defaults`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown filter or sort order, or an out-of-range page.
    pub fn ticket_query(
        &self,
        submission: ListSubmission,
        defaults: TicketQuery,
    ) -> Result<TicketQuery, ValidationError> {
        let filter = match submission.filter.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => defaults.filter,
            Some("active") => TicketFilter::Active,
            Some("inactive") => TicketFilter::Inactive,
            Some("all") => TicketFilter::All,
            Some(other) => {
                return Err(ValidationError::new(
                    "type",
                    format!("'{other}' is not one of active, inactive, all"),
                ));
            }
        };
        let order = match submission.sort_order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => defaults.order,
            Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            Some(other) => {
                return Err(ValidationError::new(
                    "sort_order",
                    format!("'{other}' is not one of asc, desc"),
                ));
            }
        };

        let page = match submission.page {
            None => defaults.page.page,
            Some(p) => u32::try_from(p)
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| ValidationError::new("page", "must be at least 1"))?,
        };
        let page_size = match submission.page_size {
            None => defaults.page.page_size,
            Some(size) => u32::try_from(size)
                .ok()
                .filter(|s| (1..=Page::MAX_SIZE).contains(s))
                .ok_or_else(|| {
                    ValidationError::new(
                        "page_size",
                        format!("must be between 1 and {}", Page::MAX_SIZE),
                    )
                })?,
        };

        Ok(TicketQuery {
            filter,
            order,
            page: Page { page, page_size },
        })
    }

    /// Validate a history range.
    ///
    /// # Errors
    ///
    /// Fails when `from` is zero or greater than `to`, or either bound is
    /// past the largest storable sequence number.
    pub fn seq_range(&self, submission: HistorySubmission) -> Result<SeqRange, ValidationError> {
        if submission.from == Some(0) || submission.to == Some(0) {
            return Err(ValidationError::new("from", "sequence numbers start at 1"));
        }
        for (field, bound) in [("from", submission.from), ("to", submission.to)] {
            if bound.is_some_and(|n| n > MAX_SEQUENCE) {
                return Err(ValidationError::new(
                    field,
                    format!("must be at most {MAX_SEQUENCE}"),
                ));
            }
        }
        if let (Some(from), Some(to)) = (submission.from, submission.to) {
            if from > to {
                return Err(ValidationError::new(
                    "from",
                    format!("{from} is greater than to ({to})"),
                ));
            }
        }
        Ok(SeqRange {
            from: submission.from.map(SequenceNo::new),
            to: submission.to.map(SequenceNo::new),
        })
    }

    /// Parse an optional media kind filter.
    ///
    /// # Errors
    ///
    /// Fails on an unknown kind.
    pub fn media_kind_filter(&self, raw: Option<&str>) -> Result<Option<MediaKind>, ValidationError> {
        raw.filter(|s| !s.is_empty()).map(MediaKind::parse).transpose()
    }

    fn location_fix(
        &self,
        raw: LocationSubmission,
        now: DateTime<Utc>,
    ) -> Result<LocationFix, ValidationError> {
        let latitude = raw.latitude.ok_or_else(|| ValidationError::missing("latitude"))?;
        let longitude = raw.longitude.ok_or_else(|| ValidationError::missing("longitude"))?;
        let recorded_at = raw
            .recorded_at
            .ok_or_else(|| ValidationError::missing("recorded_at"))?;
        let coordinates = Coordinates::new(latitude, longitude)?;
        self.check_not_future("recorded_at", recorded_at, now)?;
        Ok(LocationFix {
            coordinates,
            recorded_at,
        })
    }

    fn check_not_future(
        &self,
        field: &'static str,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if at > now + self.max_clock_skew {
            return Err(ValidationError::new(field, "lies in the future"));
        }
        Ok(())
    }
}

fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::missing(field));
    }
    Uuid::parse_str(raw).map_err(|_| ValidationError::new(field, format!("'{raw}' is not a UUID")))
}

fn check_external_id(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::missing(field));
    }
    if raw.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_ID_LEN} characters"),
        ));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::new(field, "must not contain whitespace"));
    }
    Ok(())
}

fn check_storage_reference(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::missing("storage_reference"));
    }
    if raw.len() > MAX_STORAGE_REFERENCE_LEN {
        return Err(ValidationError::new(
            "storage_reference",
            format!("must be at most {MAX_STORAGE_REFERENCE_LEN} bytes"),
        ));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::new(
            "storage_reference",
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

fn check_idempotency_key(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() || raw.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::new(
            "idempotency_key",
            format!("must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"),
        ));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
    {
        return Err(ValidationError::new(
            "idempotency_key",
            "may only contain letters, digits, '.', '_', ':' and '-'",
        ));
    }
    Ok(())
}
