//! Media attachment endpoints.

use crate::error::AppError;
use crate::extractors::{AuthenticatedPrincipal, IdempotencyKeyHeader};
use crate::state::AppState;
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use kawach_core::MediaAttachment;
use kawach_core::validate::MediaSubmission;
use serde::Deserialize;

/// Query string of `GET /v2/tickets/:ticket_id/media`
#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    /// `AUDIO`, `VIDEO` or `IMAGE`, any case
    pub kind: Option<String>,
}

/// Record a media reference.
///
/// The `Idempotency-Key` header wins over a key in the body. 201 when the
/// attachment is new, 200 with the original record when the key was seen.
///
/// # Errors
///
/// 422 without a key or with an unknown kind, 409 once the ticket is closed.
pub async fn attach(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    IdempotencyKeyHeader(header_key): IdempotencyKeyHeader,
    Path(ticket_id): Path<String>,
    payload: Result<Json<MediaSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<MediaAttachment>), AppError> {
    let Json(mut submission) = payload?;
    if header_key.is_some() {
        submission.idempotency_key = header_key;
    }

    let outcome = state
        .engine
        .attach_media(&principal, &ticket_id, submission)
        .await?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into_attachment())))
}

/// Attachments of the ticket, optionally of one kind.
///
/// # Errors
///
/// 422 for an unknown kind, 403 when the ticket is not visible.
pub async fn list(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(ticket_id): Path<String>,
    query: Result<Query<MediaQuery>, QueryRejection>,
) -> Result<Json<Vec<MediaAttachment>>, AppError> {
    let Query(MediaQuery { kind }) = query?;
    let media = state
        .engine
        .list_media(&principal, &ticket_id, kind.as_deref())
        .await?;
    Ok(Json(media))
}

/// One attachment.
///
/// # Errors
///
/// 404 for an unknown attachment, 403 when the ticket is not visible.
pub async fn get_one(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path((ticket_id, media_id)): Path<(String, String)>,
) -> Result<Json<MediaAttachment>, AppError> {
    let attachment = state
        .engine
        .get_attachment(&principal, &ticket_id, &media_id)
        .await?;
    Ok(Json(attachment))
}
