//! Row decoding and value conversions.

use kawach_core::{
    AttachmentId, IdempotencyKey, LocationPing, MediaAttachment, MediaKind, PoliceStation,
    SequenceNo, StationId, StoreError, Ticket, TicketId, TicketStatus, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const TICKET_COLUMNS: &str = "ticket_id, user_id, status, assigned_police_station_id, \
     transfer_reason, created_at, updated_at, closed_at";

pub(crate) const PING_COLUMNS: &str =
    "ticket_id, sequence_no, latitude, longitude, recorded_at, received_at";

pub(crate) const MEDIA_COLUMNS: &str = "attachment_id, ticket_id, kind, storage_reference, \
     idempotency_key, captured_at, uploaded_at";

pub(crate) const STATION_COLUMNS: &str = "station_id, name, latitude, longitude, credential_hash";

pub(crate) fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

pub(crate) fn seq_to_db(seq: SequenceNo) -> Result<i64, StoreError> {
    i64::try_from(seq.get())
        .map_err(|_| StoreError::Backend(format!("sequence number {seq} out of range")))
}

fn seq_from_db(raw: i64) -> Result<SequenceNo, StoreError> {
    u64::try_from(raw)
        .map(SequenceNo::new)
        .map_err(|_| StoreError::Backend(format!("negative sequence number {raw}")))
}

pub(crate) fn status_from_db(raw: &str) -> Result<TicketStatus, StoreError> {
    TicketStatus::parse(raw).map_err(|e| StoreError::Backend(e.to_string()))
}

pub(crate) fn ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let station: Option<String> = row.try_get("assigned_police_station_id").map_err(backend)?;
    Ok(Ticket {
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id").map_err(backend)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(backend)?),
        status: status_from_db(&status)?,
        assigned_police_station_id: station.map(StationId::new),
        transfer_reason: row.try_get("transfer_reason").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        closed_at: row.try_get("closed_at").map_err(backend)?,
    })
}

pub(crate) fn ping(row: &PgRow) -> Result<LocationPing, StoreError> {
    Ok(LocationPing {
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id").map_err(backend)?),
        sequence_no: seq_from_db(row.try_get("sequence_no").map_err(backend)?)?,
        latitude: row.try_get("latitude").map_err(backend)?,
        longitude: row.try_get("longitude").map_err(backend)?,
        recorded_at: row.try_get("recorded_at").map_err(backend)?,
        received_at: row.try_get("received_at").map_err(backend)?,
    })
}

pub(crate) fn attachment(row: &PgRow) -> Result<MediaAttachment, StoreError> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    Ok(MediaAttachment {
        attachment_id: AttachmentId::from_uuid(row.try_get("attachment_id").map_err(backend)?),
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id").map_err(backend)?),
        kind: MediaKind::parse(&kind).map_err(|e| StoreError::Backend(e.to_string()))?,
        storage_reference: row.try_get("storage_reference").map_err(backend)?,
        idempotency_key: IdempotencyKey::new(
            row.try_get::<String, _>("idempotency_key").map_err(backend)?,
        ),
        captured_at: row.try_get("captured_at").map_err(backend)?,
        uploaded_at: row.try_get("uploaded_at").map_err(backend)?,
    })
}

pub(crate) fn station(row: &PgRow) -> Result<PoliceStation, StoreError> {
    Ok(PoliceStation {
        station_id: StationId::new(row.try_get::<String, _>("station_id").map_err(backend)?),
        name: row.try_get("name").map_err(backend)?,
        latitude: row.try_get("latitude").map_err(backend)?,
        longitude: row.try_get("longitude").map_err(backend)?,
        credential_hash: row.try_get("credential_hash").map_err(backend)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_round_trip_through_bigint() {
        assert_eq!(seq_to_db(SequenceNo::new(42)).unwrap(), 42);
        assert_eq!(seq_from_db(42).unwrap(), SequenceNo::new(42));
        assert!(seq_from_db(-1).is_err());
        assert!(seq_to_db(SequenceNo::new(u64::MAX)).is_err());
    }

    #[test]
    fn unknown_status_is_a_backend_error() {
        assert_eq!(status_from_db("in_progress").unwrap(), TicketStatus::InProgress);
        assert!(matches!(status_from_db("lost"), Err(StoreError::Backend(_))));
    }
}
