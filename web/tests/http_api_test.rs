//! The router end to end over the in-memory backend.

#![allow(clippy::unwrap_used)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use kawach_core::{Clock, TicketId};
use kawach_testing::fixtures::{self, police_station};
use kawach_testing::{FixedClock, InMemoryStore, test_clock};
use kawach_web::{AppState, build_router};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    engine: kawach_runtime::Engine,
    clock: FixedClock,
}

impl Harness {
    fn new(store: &InMemoryStore) -> Self {
        let clock = test_clock();
        let engine = fixtures::engine_with_clock(store, &clock);
        Self {
            app: build_router(AppState::new(engine.clone())),
            engine,
            clock,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        principal: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> Response {
        self.call_with(method, uri, principal, &[], body).await
    }

    async fn call_with(
        &self,
        method: Method,
        uri: &str,
        principal: Option<(&str, &str)>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((kind, id)) = principal {
            builder = builder
                .header("X-Principal-Type", kind)
                .header("X-Principal-Id", id);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn ping(&self, latitude: f64, longitude: f64) -> Value {
        json!({
            "latitude": latitude,
            "longitude": longitude,
            "recorded_at": self.clock.now(),
        })
    }

    async fn open_ticket(&self, user: &str, location: Option<Value>) -> String {
        let body = location.map(|l| json!({ "initial_location": l }));
        let response = self
            .call(
                Method::POST,
                &format!("/v2/users/{user}/tickets"),
                Some(("user", user)),
                body,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        created["ticket"]["ticket_id"].as_str().unwrap().to_string()
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn error_code(response: Response) -> String {
    body_json(response).await["error"]["code"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn probes_answer_and_carry_a_request_id() {
    let harness = Harness::new(&InMemoryStore::new());

    let response = harness.call(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await["status"], "ok");

    let response = harness
        .call_with(Method::GET, "/ready", None, &[("x-request-id", "req-42")], None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn requests_without_a_principal_are_unauthorized() {
    let harness = Harness::new(&InMemoryStore::new());
    let response = harness
        .call(Method::POST, "/v2/users/u1/tickets", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn scenario_u1_over_http() {
    let store = InMemoryStore::new();
    let harness = Harness::new(&store);
    let me = Some(("user", "u1"));

    let id = harness
        .open_ticket("u1", Some(harness.ping(28.61, 77.20)))
        .await;
    let base = format!("/v2/tickets/{id}");

    let response = harness
        .call(
            Method::POST,
            &format!("{base}/location"),
            me,
            Some(harness.ping(28.62, 77.21)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["sequence_no"], 2);

    let latest = body_json(harness.call(Method::GET, &format!("{base}/location"), me, None).await).await;
    assert_eq!(latest["sequence_no"], 2);
    assert_eq!(latest["latitude"], 28.62);

    let clip = json!({ "kind": "audio", "storage_reference": "s3://kawach-media/k1" });
    let first = harness
        .call_with(
            Method::POST,
            &format!("{base}/media"),
            me,
            &[("Idempotency-Key", "k1")],
            Some(clip.clone()),
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = body_json(first).await;
    let again = harness
        .call_with(
            Method::POST,
            &format!("{base}/media"),
            me,
            &[("Idempotency-Key", "k1")],
            Some(clip),
        )
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(body_json(again).await["attachment_id"], first["attachment_id"]);

    let response = harness.call(Method::PUT, &format!("{base}/close"), me, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "CLOSED");

    let response = harness
        .call(
            Method::POST,
            &format!("{base}/location"),
            me,
            Some(harness.ping(28.63, 77.22)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "TICKET_CLOSED");

    let summary = body_json(harness.call(Method::GET, &format!("{base}/summary"), me, None).await).await;
    assert_eq!(summary["status"], "CLOSED");
    assert_eq!(summary["location_count"], 2);
    assert_eq!(summary["media"]["audio"], 1);
    let ticket_id: TicketId = serde_json::from_value(json!(id)).unwrap();
    assert_eq!(store.media_count(ticket_id), 1);
}

#[tokio::test]
async fn engine_errors_map_to_status_codes() {
    let harness = Harness::new(&InMemoryStore::new());
    let id = harness.open_ticket("u1", None).await;
    let base = format!("/v2/tickets/{id}");

    // Someone else's ticket and a ticket that does not exist look the same.
    let response = harness
        .call(Method::GET, &format!("{base}/status"), Some(("user", "u2")), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = harness
        .call(
            Method::GET,
            &format!("/v2/tickets/{}/status", TicketId::new()),
            Some(("user", "u1")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "FORBIDDEN");

    let response = harness
        .call(
            Method::POST,
            &format!("{base}/location"),
            Some(("user", "u1")),
            Some(harness.ping(91.0, 0.0)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");

    let response = harness
        .call(
            Method::GET,
            &format!("{base}/locations?from=5&to=2"),
            Some(("user", "u1")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = harness
        .call(
            Method::GET,
            "/v2/tickets/not-a-uuid/status",
            Some(("user", "u1")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = harness
        .call(
            Method::PUT,
            &format!("{base}/station"),
            Some(("user", "u1")),
            Some(json!({ "station_id": "ps-nowhere" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness
        .call(Method::PUT, &format!("{base}/close"), Some(("user", "u1")), None)
        .await;
    let response = harness
        .call(Method::PUT, &format!("{base}/close"), Some(("user", "u1")), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "INVALID_TRANSITION");
}

#[tokio::test]
async fn busy_ticket_answers_503_with_retry_after() {
    let harness = Harness::new(&InMemoryStore::new());
    let id = harness.open_ticket("u1", None).await;
    let ticket_id = harness
        .engine
        .get_status(&fixtures::user("u1"), &id)
        .await
        .unwrap()
        .ticket_id;

    let held = harness
        .engine
        .coordinator()
        .locks()
        .acquire(ticket_id, Duration::from_millis(50))
        .await
        .unwrap();
    let response = harness
        .call(
            Method::POST,
            &format!("/v2/tickets/{id}/location"),
            Some(("user", "u1")),
            Some(harness.ping(28.61, 77.20)),
        )
        .await;
    drop(held);

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    assert_eq!(error_code(response).await, "BUSY");
}

#[tokio::test]
async fn station_queue_accept_and_listing() {
    let store = InMemoryStore::new();
    store.register_station(police_station("ps-cp", 28.63, 77.22));
    let harness = Harness::new(&store);
    let id = harness
        .open_ticket("u1", Some(harness.ping(28.61, 77.20)))
        .await;

    let queue = body_json(
        harness
            .call(
                Method::GET,
                "/v2/police-stations/ps-cp/tickets",
                Some(("station", "ps-cp")),
                None,
            )
            .await,
    )
    .await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["ticket_id"], id.as_str());

    // The owner cannot accept their own ticket.
    let response = harness
        .call(
            Method::PUT,
            &format!("/v2/tickets/{id}/accept"),
            Some(("user", "u1")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .call(
            Method::PUT,
            &format!("/v2/tickets/{id}/accept"),
            Some(("station", "ps-cp")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "IN_PROGRESS");

    let mine = body_json(
        harness
            .call(
                Method::GET,
                "/v2/users/u1/tickets?type=active&sort_order=asc&page=1&page_size=10",
                Some(("user", "u1")),
                None,
            )
            .await,
    )
    .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let response = harness
        .call(
            Method::GET,
            "/v2/users/u1/tickets?page_size=0",
            Some(("user", "u1")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn media_listing_and_lookup() {
    let harness = Harness::new(&InMemoryStore::new());
    let id = harness.open_ticket("u1", None).await;
    let me = Some(("user", "u1"));
    let base = format!("/v2/tickets/{id}");

    // A key in the body works when the header is absent.
    let video = body_json(
        harness
            .call(
                Method::POST,
                &format!("{base}/media"),
                me,
                Some(json!({
                    "kind": "VIDEO",
                    "storage_reference": "s3://kawach-media/v1",
                    "idempotency_key": "v1",
                })),
            )
            .await,
    )
    .await;
    harness
        .call_with(
            Method::POST,
            &format!("{base}/media"),
            me,
            &[("Idempotency-Key", "i1")],
            Some(json!({ "kind": "image", "storage_reference": "s3://kawach-media/i1" })),
        )
        .await;

    let missing_key = harness
        .call(
            Method::POST,
            &format!("{base}/media"),
            me,
            Some(json!({ "kind": "audio", "storage_reference": "s3://kawach-media/a" })),
        )
        .await;
    assert_eq!(missing_key.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let videos = body_json(
        harness
            .call(Method::GET, &format!("{base}/media?kind=video"), me, None)
            .await,
    )
    .await;
    assert_eq!(videos.as_array().unwrap().len(), 1);

    let one = harness
        .call(
            Method::GET,
            &format!("{base}/media/{}", video["attachment_id"].as_str().unwrap()),
            me,
            None,
        )
        .await;
    assert_eq!(one.status(), StatusCode::OK);
    assert_eq!(body_json(one).await["storage_reference"], "s3://kawach-media/v1");

    let detail = body_json(harness.call(Method::GET, &base, me, None).await).await;
    assert_eq!(detail["media"].as_array().unwrap().len(), 2);
    assert!(detail["locations"].as_array().unwrap().is_empty());

    let no_location = harness
        .call(Method::GET, &format!("{base}/location"), me, None)
        .await;
    assert_eq!(no_location.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn delete_removes_the_ticket() {
    let store = InMemoryStore::new();
    let harness = Harness::new(&store);
    let id = harness
        .open_ticket("u1", Some(harness.ping(28.61, 77.20)))
        .await;
    let base = format!("/v2/tickets/{id}");

    let response = harness
        .call(Method::DELETE, &base, Some(("user", "u2")), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .call(Method::DELETE, &base, Some(("user", "u1")), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.ticket_count(), 0);

    // A deleted ticket is indistinguishable from one the caller cannot see.
    for path in [format!("{base}/status"), base.clone()] {
        let response = harness
            .call(Method::GET, &path, Some(("user", "u1")), None)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }
    let response = harness
        .call(Method::DELETE, &base, Some(("user", "u1")), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn live_feed_requires_a_websocket_upgrade() {
    let harness = Harness::new(&InMemoryStore::new());
    let id = harness.open_ticket("u1", None).await;
    let response = harness
        .call(
            Method::GET,
            &format!("/v2/tickets/{id}/live"),
            Some(("user", "u1")),
            None,
        )
        .await;
    assert!(response.status().is_client_error());
}
