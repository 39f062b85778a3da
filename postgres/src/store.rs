//! The `PostgreSQL` store.

use crate::rows::{
    self, MEDIA_COLUMNS, PING_COLUMNS, STATION_COLUMNS, TICKET_COLUMNS, backend,
    is_unique_violation, seq_to_db, status_from_db,
};
use chrono::{DateTime, Utc};
use kawach_core::geo::{haversine_km, search_box};
use kawach_core::lifecycle::check_transition;
use kawach_core::store::StoreFuture;
use kawach_core::{
    AttachOutcome, AttachmentId, Coordinates, LocationLedger, LocationPing, MediaAttachment,
    MediaCounts, MediaIndex, MediaKind, NewPing, PoliceStation, SeqRange, SequenceNo, SortOrder,
    StationDirectory, StationId, StoreError, Ticket, TicketFilter, TicketId, TicketQuery,
    TicketStatus, TicketStore, UserId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

/// Store backed by a `PostgreSQL` pool
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Use an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Add or replace a police station in the directory.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on database failure.
    pub async fn register_station(&self, station: &PoliceStation) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO police_stations (station_id, name, latitude, longitude, credential_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (station_id) DO UPDATE
            SET name = EXCLUDED.name,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                credential_hash = EXCLUDED.credential_hash
            ",
        )
        .bind(station.station_id.as_str())
        .bind(&station.name)
        .bind(station.latitude)
        .bind(station.longitude)
        .bind(&station.credential_hash)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn list_tickets(
        &self,
        owner_column: &'static str,
        owner: &str,
        query: TicketQuery,
    ) -> Result<Vec<Ticket>, StoreError> {
        let status_clause = match query.filter {
            TicketFilter::Active => "AND status <> 'closed'",
            TicketFilter::Inactive => "AND status = 'closed'",
            TicketFilter::All => "",
        };
        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE {owner_column} = $1 {status_clause}
             ORDER BY created_at {direction}, position {direction}
             LIMIT $2 OFFSET $3"
        );

        let limit = i64::try_from(query.page.limit()).unwrap_or(i64::MAX);
        let offset = i64::try_from(query.page.offset()).unwrap_or(i64::MAX);
        let found = sqlx::query(&sql)
            .bind(owner)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        found.iter().map(rows::ticket).collect()
    }

    /// Lock the ticket row and fail unless it exists and is open.
    async fn lock_open_ticket(
        tx: &mut Transaction<'_, Postgres>,
        ticket_id: TicketId,
    ) -> Result<(), StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM tickets WHERE ticket_id = $1 FOR UPDATE")
                .bind(ticket_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(backend)?;
        match status {
            None => Err(StoreError::NotFound(ticket_id)),
            Some(raw) if status_from_db(&raw)? == TicketStatus::Closed => {
                Err(StoreError::TicketClosed(ticket_id))
            }
            Some(_) => Ok(()),
        }
    }

    async fn insert_ticket_row(
        tx: &mut Transaction<'_, Postgres>,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(ticket.ticket_id.as_uuid())
            .bind(ticket.user_id.as_str())
            .bind(ticket.status.as_str())
            .bind(ticket.assigned_police_station_id.as_ref().map(StationId::as_str))
            .bind(ticket.transfer_reason.as_deref())
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .bind(ticket.closed_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict {
                        ticket_id: ticket.ticket_id,
                        reason: "ticket id already exists".into(),
                    }
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    async fn current_status(&self, ticket_id: TicketId) -> Result<Option<TicketStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM tickets WHERE ticket_id = $1")
                .bind(ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        status.as_deref().map(status_from_db).transpose()
    }
}

impl TicketStore for PostgresStore {
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(backend)?;
            Self::insert_ticket_row(&mut tx, &ticket).await?;
            tx.commit().await.map_err(backend)?;
            Ok(ticket)
        })
    }

    fn insert_with_ping(
        &self,
        ticket: Ticket,
        first: NewPing,
    ) -> StoreFuture<'_, (Ticket, LocationPing)> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(backend)?;
            Self::insert_ticket_row(&mut tx, &ticket).await?;

            let sql = format!(
                "INSERT INTO location_pings ({PING_COLUMNS})
                 VALUES ($1, 1, $2, $3, $4, $5)
                 RETURNING {PING_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(ticket.ticket_id.as_uuid())
                .bind(first.coordinates.latitude())
                .bind(first.coordinates.longitude())
                .bind(first.recorded_at)
                .bind(first.received_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(backend)?;
            let ping = rows::ping(&row)?;
            tx.commit().await.map_err(backend)?;
            Ok((ticket, ping))
        })
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = $1");
            let row = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            row.as_ref().map(rows::ticket).transpose()
        })
    }

    fn list_by_user(&self, user_id: UserId, query: TicketQuery) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move { self.list_tickets("user_id", user_id.as_str(), query).await })
    }

    fn list_by_station(
        &self,
        station_id: StationId,
        query: TicketQuery,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.list_tickets("assigned_police_station_id", station_id.as_str(), query)
                .await
        })
    }

    fn transition(
        &self,
        ticket_id: TicketId,
        expected: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            check_transition(expected, to).map_err(|e| StoreError::Conflict {
                ticket_id,
                reason: e.to_string(),
            })?;

            let sql = format!(
                "UPDATE tickets
                 SET status = $3,
                     updated_at = $4,
                     closed_at = CASE WHEN $3 = 'closed' THEN $4 ELSE closed_at END
                 WHERE ticket_id = $1 AND status = $2
                 RETURNING {TICKET_COLUMNS}"
            );
            let updated = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(expected.as_str())
                .bind(to.as_str())
                .bind(at)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

            if let Some(row) = updated {
                return rows::ticket(&row);
            }
            match self.current_status(ticket_id).await? {
                None => Err(StoreError::NotFound(ticket_id)),
                Some(actual) => Err(StoreError::Conflict {
                    ticket_id,
                    reason: format!("expected {expected}, found {actual}"),
                }),
            }
        })
    }

    fn assign_station(
        &self,
        ticket_id: TicketId,
        station_id: StationId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE tickets
                 SET assigned_police_station_id = $2, transfer_reason = $3, updated_at = $4
                 WHERE ticket_id = $1 AND status <> 'closed'
                 RETURNING {TICKET_COLUMNS}"
            );
            let updated = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(station_id.as_str())
                .bind(reason.as_deref())
                .bind(at)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

            if let Some(row) = updated {
                return rows::ticket(&row);
            }
            match self.current_status(ticket_id).await? {
                None => Err(StoreError::NotFound(ticket_id)),
                Some(_) => Err(StoreError::TicketClosed(ticket_id)),
            }
        })
    }

    fn delete(&self, ticket_id: TicketId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tickets WHERE ticket_id = $1")
                .bind(ticket_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.rows_affected() > 0)
        })
    }
}

impl LocationLedger for PostgresStore {
    fn append(&self, ping: NewPing) -> StoreFuture<'_, LocationPing> {
        Box::pin(async move {
            let ticket_id = ping.ticket_id;
            let mut tx = self.pool.begin().await.map_err(backend)?;
            Self::lock_open_ticket(&mut tx, ticket_id).await?;

            let sql = format!(
                "INSERT INTO location_pings ({PING_COLUMNS})
                 SELECT $1, COALESCE(MAX(sequence_no), 0) + 1, $2, $3, $4, $5
                 FROM location_pings WHERE ticket_id = $1
                 RETURNING {PING_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(ping.coordinates.latitude())
                .bind(ping.coordinates.longitude())
                .bind(ping.recorded_at)
                .bind(ping.received_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::Conflict {
                            ticket_id,
                            reason: "concurrent append".into(),
                        }
                    } else {
                        backend(e)
                    }
                })?;
            let stored = rows::ping(&row)?;
            tx.commit().await.map_err(backend)?;
            Ok(stored)
        })
    }

    fn latest(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<LocationPing>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {PING_COLUMNS} FROM location_pings
                 WHERE ticket_id = $1 ORDER BY sequence_no DESC LIMIT 1"
            );
            let row = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            row.as_ref().map(rows::ping).transpose()
        })
    }

    fn page(
        &self,
        ticket_id: TicketId,
        range: SeqRange,
        limit: u32,
    ) -> StoreFuture<'_, Vec<LocationPing>> {
        Box::pin(async move {
            let from = seq_to_db(range.from.unwrap_or(SequenceNo::FIRST))?;
            let to = range.to.map(seq_to_db).transpose()?;
            let sql = format!(
                "SELECT {PING_COLUMNS} FROM location_pings
                 WHERE ticket_id = $1
                   AND sequence_no >= $2
                   AND ($3::BIGINT IS NULL OR sequence_no <= $3)
                 ORDER BY sequence_no ASC
                 LIMIT $4"
            );
            let found = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(from)
                .bind(to)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
            found.iter().map(rows::ping).collect()
        })
    }
}

impl MediaIndex for PostgresStore {
    fn attach(&self, attachment: MediaAttachment) -> StoreFuture<'_, AttachOutcome> {
        Box::pin(async move {
            let ticket_id = attachment.ticket_id;
            let mut tx = self.pool.begin().await.map_err(backend)?;
            Self::lock_open_ticket(&mut tx, ticket_id).await?;

            let sql = format!(
                "INSERT INTO media_attachments ({MEDIA_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (ticket_id, idempotency_key) DO NOTHING"
            );
            let inserted = sqlx::query(&sql)
                .bind(attachment.attachment_id.as_uuid())
                .bind(ticket_id.as_uuid())
                .bind(attachment.kind.as_str())
                .bind(&attachment.storage_reference)
                .bind(attachment.idempotency_key.as_str())
                .bind(attachment.captured_at)
                .bind(attachment.uploaded_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?
                .rows_affected()
                > 0;

            let outcome = if inserted {
                AttachOutcome::Created(attachment)
            } else {
                let sql = format!(
                    "SELECT {MEDIA_COLUMNS} FROM media_attachments
                     WHERE ticket_id = $1 AND idempotency_key = $2"
                );
                let row = sqlx::query(&sql)
                    .bind(ticket_id.as_uuid())
                    .bind(attachment.idempotency_key.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(backend)?;
                AttachOutcome::Existing(rows::attachment(&row)?)
            };
            tx.commit().await.map_err(backend)?;
            Ok(outcome)
        })
    }

    fn get(
        &self,
        ticket_id: TicketId,
        attachment_id: AttachmentId,
    ) -> StoreFuture<'_, Option<MediaAttachment>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {MEDIA_COLUMNS} FROM media_attachments
                 WHERE ticket_id = $1 AND attachment_id = $2"
            );
            let row = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(attachment_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            row.as_ref().map(rows::attachment).transpose()
        })
    }

    fn list(
        &self,
        ticket_id: TicketId,
        kind: Option<MediaKind>,
    ) -> StoreFuture<'_, Vec<MediaAttachment>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {MEDIA_COLUMNS} FROM media_attachments
                 WHERE ticket_id = $1 AND ($2::TEXT IS NULL OR kind = $2)
                 ORDER BY uploaded_at ASC, attachment_id ASC"
            );
            let found = sqlx::query(&sql)
                .bind(ticket_id.as_uuid())
                .bind(kind.map(|k| k.as_str()))
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
            found.iter().map(rows::attachment).collect()
        })
    }

    fn counts(&self, ticket_id: TicketId) -> StoreFuture<'_, MediaCounts> {
        Box::pin(async move {
            let found = sqlx::query(
                "SELECT kind, COUNT(*) AS total FROM media_attachments
                 WHERE ticket_id = $1 GROUP BY kind",
            )
            .bind(ticket_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

            let mut counts = MediaCounts::default();
            for row in &found {
                let kind: String = row.try_get("kind").map_err(backend)?;
                let total: i64 = row.try_get("total").map_err(backend)?;
                let total = u64::try_from(total).unwrap_or(0);
                match MediaKind::parse(&kind).map_err(|e| StoreError::Backend(e.to_string()))? {
                    MediaKind::Audio => counts.audio = total,
                    MediaKind::Video => counts.video = total,
                    MediaKind::Image => counts.image = total,
                }
            }
            Ok(counts)
        })
    }
}

impl StationDirectory for PostgresStore {
    fn station(&self, station_id: StationId) -> StoreFuture<'_, Option<PoliceStation>> {
        Box::pin(async move {
            let sql = format!("SELECT {STATION_COLUMNS} FROM police_stations WHERE station_id = $1");
            let row = sqlx::query(&sql)
                .bind(station_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            row.as_ref().map(rows::station).transpose()
        })
    }

    fn nearest(&self, at: Coordinates, radius_km: f64) -> StoreFuture<'_, Option<PoliceStation>> {
        Box::pin(async move {
            // The index narrows to a bounding box; exact distance is computed here.
            let window = search_box(at, radius_km);
            let sql = format!(
                "SELECT {STATION_COLUMNS} FROM police_stations
                 WHERE latitude BETWEEN $1 AND $2 AND longitude BETWEEN $3 AND $4"
            );
            let candidates = sqlx::query(&sql)
                .bind(window.min_latitude)
                .bind(window.max_latitude)
                .bind(window.min_longitude)
                .bind(window.max_longitude)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

            let mut best: Option<(f64, PoliceStation)> = None;
            for row in &candidates {
                let station = rows::station(row)?;
                let Ok(position) = Coordinates::new(station.latitude, station.longitude) else {
                    continue;
                };
                let distance = haversine_km(at, position);
                if distance <= radius_km && best.as_ref().is_none_or(|(d, _)| distance < *d) {
                    best = Some((distance, station));
                }
            }
            Ok(best.map(|(_, station)| station))
        })
    }
}
