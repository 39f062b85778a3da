//! Domain types for the Kawach ticket engine.
//!
//! Identifiers are newtypes so a station id can never be passed where a user id
//! is expected. Values built from untrusted input go through
//! [`Validator`](crate::validate::Validator); the plain constructors here are for
//! trusted sources such as the database.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an emergency ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a media attachment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Creates a new random `AttachmentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AttachmentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user owning a ticket (issued by the identity provider)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a trusted user id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a police station
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    /// Wrap a trusted station id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a ping in its ticket's ledger.
///
/// Assigned by the ledger, never by the client. The first ping of a ticket is
/// number 1 and every append adds exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNo(u64);

impl SequenceNo {
    /// Sequence number of the first ping of a ticket
    pub const FIRST: Self = Self(1);

    /// Wrap a raw sequence number
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The number following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied token making a media attach safe to retry
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a trusted key
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Value objects
// ============================================================================

/// A WGS84 position.
///
/// Only constructible with a finite latitude in `[-90, 90]` and a finite
/// longitude in `[-180, 180]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    /// Build coordinates, rejecting out-of-range or non-finite values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the offending field.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::new(
                "latitude",
                format!("must be between -90 and 90, got {latitude}"),
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::new(
                "longitude",
                format!("must be between -180 and 180, got {longitude}"),
            ));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Latitude in degrees
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Lifecycle status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Ticket opened, not yet picked up by a station
    Open,
    /// Assigned station has accepted the ticket
    InProgress,
    /// Resolved; terminal
    Closed,
}

impl TicketStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 3] = [Self::Open, Self::InProgress, Self::Closed];

    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            other => Err(ValidationError::new(
                "status",
                format!("unknown ticket status '{other}'"),
            )),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

/// Kind of media evidence attached to a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    /// Audio recording
    Audio,
    /// Video recording
    Video,
    /// Still image
    Image,
}

impl MediaKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Image => "image",
        }
    }

    /// Parse a media kind, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for unrecognized kinds.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            _ => Err(ValidationError::new(
                "kind",
                format!("'{s}' is not one of AUDIO, VIDEO, IMAGE"),
            )),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// An emergency session opened by a user.
///
/// `closed_at` is set exactly when `status` is [`TicketStatus::Closed`]; the
/// only code that changes `status` is
/// [`Ticket::apply_transition`](crate::lifecycle), which keeps the two in step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identity
    pub ticket_id: TicketId,
    /// Owning user
    pub user_id: UserId,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Station monitoring this ticket, if any
    pub assigned_police_station_id: Option<StationId>,
    /// Why the ticket was last moved between stations
    pub transfer_reason: Option<String>,
    /// Server time of creation
    pub created_at: DateTime<Utc>,
    /// Server time of the last status or assignment change
    pub updated_at: DateTime<Utc>,
    /// Server time of closing
    pub closed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// A freshly opened ticket
    #[must_use]
    pub const fn open(ticket_id: TicketId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            ticket_id,
            user_id,
            status: TicketStatus::Open,
            assigned_police_station_id: None,
            transfer_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Whether the ticket reached its terminal state
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == TicketStatus::Closed
    }

    /// Whether `user_id` owns this ticket
    #[must_use]
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Whether `station_id` is the assigned station
    #[must_use]
    pub fn is_assigned_to(&self, station_id: &StationId) -> bool {
        self.assigned_police_station_id.as_ref() == Some(station_id)
    }
}

/// One position sample in a ticket's ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationPing {
    /// Owning ticket
    pub ticket_id: TicketId,
    /// Ledger position, assigned at append time
    pub sequence_no: SequenceNo,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Client timestamp of the fix
    pub recorded_at: DateTime<Utc>,
    /// Server timestamp of the append
    pub received_at: DateTime<Utc>,
}

/// Reference to media evidence stored outside the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Attachment identity
    pub attachment_id: AttachmentId,
    /// Owning ticket
    pub ticket_id: TicketId,
    /// Media kind
    pub kind: MediaKind,
    /// Opaque pointer returned by object storage
    pub storage_reference: String,
    /// Key the attachment was recorded under
    pub idempotency_key: IdempotencyKey,
    /// Client timestamp of the capture
    pub captured_at: DateTime<Utc>,
    /// Server timestamp of the attach
    pub uploaded_at: DateTime<Utc>,
}

/// A police station that can be assigned to tickets
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoliceStation {
    /// Station identity
    pub station_id: StationId,
    /// Display name
    pub name: String,
    /// Station latitude
    pub latitude: f64,
    /// Station longitude
    pub longitude: f64,
    /// Login credential hash, verified by the identity gateway only
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
}

// ============================================================================
// Store inputs
// ============================================================================

/// A ping about to be appended; the ledger assigns its sequence number
#[derive(Clone, Debug, PartialEq)]
pub struct NewPing {
    /// Owning ticket
    pub ticket_id: TicketId,
    /// Position
    pub coordinates: Coordinates,
    /// Client timestamp
    pub recorded_at: DateTime<Utc>,
    /// Server timestamp
    pub received_at: DateTime<Utc>,
}

impl NewPing {
    /// The stored ping once the ledger picked `sequence_no`
    #[must_use]
    pub const fn into_ping(self, sequence_no: SequenceNo) -> LocationPing {
        LocationPing {
            ticket_id: self.ticket_id,
            sequence_no,
            latitude: self.coordinates.latitude(),
            longitude: self.coordinates.longitude(),
            recorded_at: self.recorded_at,
            received_at: self.received_at,
        }
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Which tickets a listing returns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketFilter {
    /// Tickets that are not closed
    Active,
    /// Closed tickets
    Inactive,
    /// Everything
    #[default]
    All,
}

impl TicketFilter {
    /// Whether `status` passes the filter
    #[must_use]
    pub const fn matches(self, status: TicketStatus) -> bool {
        match self {
            Self::Active => !matches!(status, TicketStatus::Closed),
            Self::Inactive => matches!(status, TicketStatus::Closed),
            Self::All => true,
        }
    }
}

/// Ordering on `created_at`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    #[default]
    Desc,
}

/// One-based page of a listing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number, starting at 1
    pub page: u32,
    /// Items per page
    pub page_size: u32,
}

impl Page {
    /// Default page size
    pub const DEFAULT_SIZE: u32 = 10;
    /// Largest accepted page size
    pub const MAX_SIZE: u32 = 100;

    /// Number of items to skip
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.page_size as u64
    }

    /// Number of items to return
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.page_size as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: Self::DEFAULT_SIZE,
        }
    }
}

/// A validated ticket listing request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TicketQuery {
    /// Status filter
    pub filter: TicketFilter,
    /// Order on `created_at`
    pub order: SortOrder,
    /// Page window
    pub page: Page,
}

/// Inclusive range of sequence numbers; open ends are unbounded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRange {
    /// First sequence number to include
    pub from: Option<SequenceNo>,
    /// Last sequence number to include
    pub to: Option<SequenceNo>,
}

impl SeqRange {
    /// The whole ledger
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Whether `seq` falls inside the range
    #[must_use]
    pub fn contains(&self, seq: SequenceNo) -> bool {
        self.from.is_none_or(|from| seq >= from) && self.to.is_none_or(|to| seq <= to)
    }
}

// ============================================================================
// Read views
// ============================================================================

/// Attachment counts per media kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    /// Audio attachments
    pub audio: u64,
    /// Video attachments
    pub video: u64,
    /// Image attachments
    pub image: u64,
}

impl MediaCounts {
    /// Count one more attachment of `kind`
    pub const fn record(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Audio => self.audio += 1,
            MediaKind::Video => self.video += 1,
            MediaKind::Image => self.image += 1,
        }
    }

    /// Count for a single kind
    #[must_use]
    pub const fn of(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
            MediaKind::Image => self.image,
        }
    }

    /// All attachments
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.audio + self.video + self.image
    }
}

/// Status view of a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Ticket identity
    pub ticket_id: TicketId,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Assigned station
    pub assigned_police_station_id: Option<StationId>,
    /// Last status or assignment change
    pub updated_at: DateTime<Utc>,
    /// Closing time
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Ticket> for StatusView {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            status: ticket.status,
            assigned_police_station_id: ticket.assigned_police_station_id.clone(),
            updated_at: ticket.updated_at,
            closed_at: ticket.closed_at,
        }
    }
}

/// Derived summary of a ticket, recomputed from the stores on every read
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Ticket identity
    pub ticket_id: TicketId,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Assigned station
    pub assigned_police_station_id: Option<StationId>,
    /// Most recent ping
    pub latest_location: Option<LocationPing>,
    /// Number of pings in the ledger
    pub location_count: u64,
    /// Attachments per kind
    pub media: MediaCounts,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Closing time
    pub closed_at: Option<DateTime<Utc>>,
}

/// Ticket with its full ledger and every attachment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketDetail {
    /// The ticket
    pub ticket: Ticket,
    /// Every ping, ascending by sequence number
    pub locations: Vec<LocationPing>,
    /// Every attachment, in upload order
    pub media: Vec<MediaAttachment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_accept_boundaries() {
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn coordinates_reject_out_of_range_and_nan() {
        assert_eq!(
            Coordinates::new(90.5, 0.0).map_err(|e| e.field),
            Err("latitude")
        );
        assert_eq!(
            Coordinates::new(0.0, -180.01).map_err(|e| e.field),
            Err("longitude")
        );
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
        assert!(Coordinates::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in TicketStatus::ALL {
            assert_eq!(TicketStatus::parse(status.as_str()), Ok(status));
        }
        assert!(TicketStatus::parse("Active").is_err());
    }

    #[test]
    fn media_kind_parses_any_case() {
        assert_eq!(MediaKind::parse("AUDIO"), Ok(MediaKind::Audio));
        assert_eq!(MediaKind::parse("video"), Ok(MediaKind::Video));
        assert_eq!(MediaKind::parse("Image"), Ok(MediaKind::Image));
        assert!(MediaKind::parse("document").is_err());
    }

    #[test]
    fn page_offsets() {
        let page = Page {
            page: 3,
            page_size: 10,
        };
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);
        assert_eq!(Page::default().offset(), 0);
    }

    #[test]
    fn seq_range_bounds_are_inclusive() {
        let range = SeqRange {
            from: Some(SequenceNo::new(2)),
            to: Some(SequenceNo::new(4)),
        };
        assert!(!range.contains(SequenceNo::new(1)));
        assert!(range.contains(SequenceNo::new(2)));
        assert!(range.contains(SequenceNo::new(4)));
        assert!(!range.contains(SequenceNo::new(5)));
        assert!(SeqRange::all().contains(SequenceNo::new(u64::MAX)));
    }

    #[test]
    fn filter_matches_statuses() {
        assert!(TicketFilter::Active.matches(TicketStatus::InProgress));
        assert!(!TicketFilter::Active.matches(TicketStatus::Closed));
        assert!(TicketFilter::Inactive.matches(TicketStatus::Closed));
        assert!(TicketFilter::All.matches(TicketStatus::Open));
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap_or_default();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
