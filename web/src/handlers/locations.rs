//! Location endpoints.

use crate::error::AppError;
use crate::extractors::AuthenticatedPrincipal;
use crate::state::AppState;
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kawach_core::LocationPing;
use kawach_core::validate::{HistorySubmission, LocationSubmission};

/// Append a ping; answers with the stored ping and its sequence number.
///
/// # Errors
///
/// 422 for out-of-range coordinates, 409 once the ticket is closed.
pub async fn append(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
    payload: Result<Json<LocationSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<LocationPing>), AppError> {
    let Json(submission) = payload?;
    let ping = state
        .engine
        .append_location(&principal, &ticket_id, submission)
        .await?;
    tracing::debug!(%ticket_id, sequence_no = %ping.sequence_no, "ping appended");
    Ok((StatusCode::CREATED, Json(ping)))
}

/// Latest ping, or 204 when the ticket has none yet.
///
/// # Errors
///
/// 403 when the ticket is not visible to the caller.
pub async fn latest(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
) -> Result<Response, AppError> {
    let latest = state
        .engine
        .get_latest_location(&principal, &ticket_id)
        .await?;
    Ok(match latest {
        Some(ping) => Json(ping).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Pings in sequence order, optionally limited to `?from=&to=` (inclusive).
///
/// # Errors
///
/// 422 for an inverted range, 403 when the ticket is not visible.
pub async fn history(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
    query: Result<Query<HistorySubmission>, QueryRejection>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    let Query(submission) = query?;
    let history = state
        .engine
        .location_history(&principal, &ticket_id, submission)
        .await?;
    Ok(Json(history.collect().await?))
}
