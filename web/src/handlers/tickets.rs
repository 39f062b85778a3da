//! Ticket endpoints: create, list, read, lifecycle and delete.
//!
//! A ticket that does not exist answers 403 exactly like one the caller may
//! not see, so a deleted ticket reads as 403 rather than 404.

use crate::error::AppError;
use crate::extractors::AuthenticatedPrincipal;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use kawach_core::validate::{AssignSubmission, CreateTicketSubmission, ListSubmission};
use kawach_core::{LocationPing, StatusView, Summary, Ticket, TicketDetail, TicketId};
use kawach_runtime::CreatedTicket;
use serde::Serialize;

/// Response of `POST /v2/users/:user_id/tickets`
#[derive(Debug, Serialize)]
pub struct CreateTicketResponse {
    /// The new ticket
    pub ticket: Ticket,
    /// Ping 1, when the request carried a location
    pub initial_location: Option<LocationPing>,
    /// Older open tickets closed by this request
    pub superseded: Vec<TicketId>,
}

impl From<CreatedTicket> for CreateTicketResponse {
    fn from(created: CreatedTicket) -> Self {
        Self {
            ticket: created.ticket,
            initial_location: created.initial_location,
            superseded: created.superseded,
        }
    }
}

/// Open a ticket. The body is optional; an empty body opens a ticket
/// without a location.
///
/// # Errors
///
/// 422 for a malformed body or location, 403 when opening for someone else.
pub async fn create(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateTicketResponse>), AppError> {
    let submission = if body.iter().all(u8::is_ascii_whitespace) {
        CreateTicketSubmission::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::validation(e.to_string()))?
    };

    let created = state
        .engine
        .create_ticket(&principal, &user_id, submission)
        .await?;
    tracing::info!(
        ticket_id = %created.ticket.ticket_id,
        %principal,
        superseded = created.superseded.len(),
        "ticket created"
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Tickets of a user (`?type=&sort_order=&page=&page_size=`).
///
/// # Errors
///
/// 422 for bad paging or filters, 403 for anyone but the user.
pub async fn list_by_user(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(user_id): Path<String>,
    query: Result<Query<ListSubmission>, QueryRejection>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let Query(submission) = query?;
    let tickets = state
        .engine
        .list_by_user(&principal, &user_id, submission)
        .await?;
    Ok(Json(tickets))
}

/// Tickets assigned to a station; active and oldest first unless asked otherwise.
///
/// # Errors
///
/// 422 for bad paging or filters, 403 for anyone but the station.
pub async fn list_by_station(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(station_id): Path<String>,
    query: Result<Query<ListSubmission>, QueryRejection>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let Query(submission) = query?;
    let tickets = state
        .engine
        .list_by_station(&principal, &station_id, submission)
        .await?;
    Ok(Json(tickets))
}

/// Ticket with its full ledger and attachments.
///
/// # Errors
///
/// 403 when the ticket is not visible to the caller or no longer exists.
pub async fn detail(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Json<TicketDetail>, AppError> {
    Ok(Json(state.engine.get_full_detail(&principal, &ticket_id).await?))
}

/// Current status.
///
/// # Errors
///
/// 403 when the ticket is not visible to the caller or no longer exists.
pub async fn status(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Json<StatusView>, AppError> {
    Ok(Json(state.engine.get_status(&principal, &ticket_id).await?))
}

/// Derived summary.
///
/// # Errors
///
/// 403 when the ticket is not visible to the caller or no longer exists.
pub async fn summary(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Json<Summary>, AppError> {
    Ok(Json(state.engine.get_summary(&principal, &ticket_id).await?))
}

/// Close the ticket.
///
/// # Errors
///
/// 409 when it is already closed, 503 when the ticket stays busy.
pub async fn close(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.engine.close_ticket(&principal, &ticket_id).await?;
    tracing::info!(ticket_id = %ticket.ticket_id, %principal, "ticket closed");
    Ok(Json(ticket))
}

/// Accept the ticket on behalf of the assigned station.
///
/// # Errors
///
/// 403 for anyone but the assigned station, 409 unless the ticket is open.
pub async fn accept(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.engine.accept_ticket(&principal, &ticket_id).await?;
    tracing::info!(ticket_id = %ticket.ticket_id, %principal, "ticket accepted");
    Ok(Json(ticket))
}

/// Assign or transfer the ticket to a station.
///
/// # Errors
///
/// 404 for an unknown station, 409 for a closed ticket.
pub async fn assign_station(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
    payload: Result<Json<AssignSubmission>, JsonRejection>,
) -> Result<Json<Ticket>, AppError> {
    let Json(submission) = payload?;
    let ticket = state
        .engine
        .assign_station(&principal, &ticket_id, submission)
        .await?;
    tracing::info!(
        ticket_id = %ticket.ticket_id,
        station = ?ticket.assigned_police_station_id,
        %principal,
        "ticket assigned"
    );
    Ok(Json(ticket))
}

/// Delete the ticket with its pings and attachments.
///
/// # Errors
///
/// 403 for anyone but the owner. Later reads and a repeated delete of
/// the same id also answer 403.
pub async fn delete(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_ticket(&principal, &ticket_id).await?;
    tracing::info!(%ticket_id, %principal, "ticket deleted");
    Ok(StatusCode::NO_CONTENT)
}
