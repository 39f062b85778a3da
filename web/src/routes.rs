//! Route table.

use crate::extractors::REQUEST_ID_HEADER;
use crate::handlers::{health, live, locations, media, tickets};
use crate::state::AppState;
use axum::{
    Router,
    body::Body,
    http::{HeaderName, Request},
    routing::{get, put},
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router.
///
/// ```text
/// POST   /v2/users/:user_id/tickets              create ticket
/// GET    /v2/users/:user_id/tickets              list by user
/// GET    /v2/police-stations/:station_id/tickets list by station
/// GET    /v2/tickets/:ticket_id                  full detail
/// DELETE /v2/tickets/:ticket_id                  delete
/// GET    /v2/tickets/:ticket_id/status           status
/// GET    /v2/tickets/:ticket_id/summary          summary
/// GET    /v2/tickets/:ticket_id/location         latest ping
/// POST   /v2/tickets/:ticket_id/location         append ping
/// GET    /v2/tickets/:ticket_id/locations        history (?from=&to=)
/// GET    /v2/tickets/:ticket_id/media            list media (?kind=)
/// POST   /v2/tickets/:ticket_id/media            attach (Idempotency-Key)
/// GET    /v2/tickets/:ticket_id/media/:media_id  one attachment
/// PUT    /v2/tickets/:ticket_id/close            close
/// PUT    /v2/tickets/:ticket_id/accept           accept
/// PUT    /v2/tickets/:ticket_id/station          assign / transfer
/// GET    /v2/tickets/:ticket_id/live             WebSocket change feed
/// GET    /health, /ready                         probes
/// ```
pub fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let api = Router::new()
        .route(
            "/users/:user_id/tickets",
            get(tickets::list_by_user).post(tickets::create),
        )
        .route(
            "/police-stations/:station_id/tickets",
            get(tickets::list_by_station),
        )
        .route(
            "/tickets/:ticket_id",
            get(tickets::detail).delete(tickets::delete),
        )
        .route("/tickets/:ticket_id/status", get(tickets::status))
        .route("/tickets/:ticket_id/summary", get(tickets::summary))
        .route("/tickets/:ticket_id/close", put(tickets::close))
        .route("/tickets/:ticket_id/accept", put(tickets::accept))
        .route("/tickets/:ticket_id/station", put(tickets::assign_station))
        .route(
            "/tickets/:ticket_id/location",
            get(locations::latest).post(locations::append),
        )
        .route("/tickets/:ticket_id/locations", get(locations::history))
        .route(
            "/tickets/:ticket_id/media",
            get(media::list).post(media::attach),
        )
        .route("/tickets/:ticket_id/media/:media_id", get(media::get_one))
        .route("/tickets/:ticket_id/live", get(live::subscribe));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/v2", api)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
        .with_state(state)
}
