//! Query façade over the in-memory backend.

#![allow(clippy::unwrap_used)]

use futures::StreamExt;
use kawach_core::validate::{CreateTicketSubmission, HistorySubmission, ListSubmission};
use kawach_core::{
    ChangeKind, Clock, EngineError, MediaKind, SequenceNo, Stores, TicketStatus,
};
use kawach_runtime::{Engine, EngineConfig, NotificationRelay};
use kawach_testing::fixtures::{self, media, ping_at, police_station, station, user};
use kawach_testing::{InMemoryStore, RecordingDispatcher, test_clock};
use std::sync::Arc;

fn small_batch_engine(store: &InMemoryStore, clock: &kawach_testing::FixedClock) -> Engine {
    Engine::builder(Stores::from_backend(Arc::new(store.clone())))
        .clock(Arc::new(clock.clone()))
        .config(EngineConfig {
            history_batch: 3,
            ..fixtures::fast_config()
        })
        .build()
}

#[tokio::test]
async fn history_pages_through_the_ledger_in_order() {
    let store = InMemoryStore::new();
    let clock = test_clock();
    let engine = small_batch_engine(&store, &clock);
    let owner = user("u1");
    let created = engine
        .create_ticket(&owner, "u1", CreateTicketSubmission::default())
        .await
        .unwrap();
    let id = created.ticket.ticket_id.to_string();
    for _ in 0..10 {
        engine
            .append_location(&owner, &id, ping_at(28.61, 77.20, clock.now()))
            .await
            .unwrap();
    }

    let all = engine
        .location_history(&owner, &id, HistorySubmission::default())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(
        all.iter().map(|p| p.sequence_no.get()).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );

    let window = engine
        .location_history(
            &owner,
            &id,
            HistorySubmission {
                from: Some(4),
                to: Some(8),
            },
        )
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(
        window.iter().map(|p| p.sequence_no.get()).collect::<Vec<_>>(),
        vec![4, 5, 6, 7, 8]
    );

    assert!(matches!(
        engine
            .location_history(
                &owner,
                &id,
                HistorySubmission {
                    from: Some(8),
                    to: Some(4),
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn open_ended_history_is_pinned_when_the_stream_starts() {
    let store = InMemoryStore::new();
    let clock = test_clock();
    let engine = small_batch_engine(&store, &clock);
    let owner = user("u1");
    let created = engine
        .create_ticket(&owner, "u1", CreateTicketSubmission::default())
        .await
        .unwrap();
    let id = created.ticket.ticket_id.to_string();
    for _ in 0..4 {
        engine
            .append_location(&owner, &id, ping_at(28.61, 77.20, clock.now()))
            .await
            .unwrap();
    }

    let history = engine
        .location_history(&owner, &id, HistorySubmission::default())
        .await
        .unwrap();
    let mut stream = history.stream();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.sequence_no, SequenceNo::FIRST);

    // Pings arriving mid-walk are not part of this pass.
    for _ in 0..4 {
        engine
            .append_location(&owner, &id, ping_at(28.62, 77.21, clock.now()))
            .await
            .unwrap();
    }
    let rest: Vec<_> = stream.map(Result::unwrap).collect().await;
    assert_eq!(rest.len(), 3);

    // A fresh pass starts over and sees everything.
    assert_eq!(history.collect().await.unwrap().len(), 8);
}

#[tokio::test]
async fn user_listing_filters_sorts_and_pages() {
    let store = InMemoryStore::new();
    let clock = test_clock();
    let engine = kawach_runtime::Engine::builder(Stores::from_backend(Arc::new(store.clone())))
        .clock(Arc::new(clock.clone()))
        .config(EngineConfig {
            supersede_open_tickets: false,
            ..fixtures::fast_config()
        })
        .build();
    let owner = user("u1");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let created = engine
            .create_ticket(&owner, "u1", CreateTicketSubmission::default())
            .await
            .unwrap();
        ids.push(created.ticket.ticket_id);
        clock.advance(chrono::Duration::minutes(1));
    }
    engine
        .close_ticket(&owner, &ids[0].to_string())
        .await
        .unwrap();

    let newest_first = engine
        .list_by_user(&owner, "u1", ListSubmission::default())
        .await
        .unwrap();
    assert_eq!(
        newest_first.iter().map(|t| t.ticket_id).collect::<Vec<_>>(),
        vec![ids[2], ids[1], ids[0]]
    );

    let inactive = engine
        .list_by_user(
            &owner,
            "u1",
            ListSubmission {
                filter: Some("inactive".into()),
                ..ListSubmission::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].status, TicketStatus::Closed);

    let second_page = engine
        .list_by_user(
            &owner,
            "u1",
            ListSubmission {
                sort_order: Some("asc".into()),
                page: Some(2),
                page_size: Some(2),
                ..ListSubmission::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        second_page.iter().map(|t| t.ticket_id).collect::<Vec<_>>(),
        vec![ids[2]]
    );

    assert_eq!(
        engine
            .list_by_user(&user("u2"), "u1", ListSubmission::default())
            .await,
        Err(EngineError::Denied)
    );
    assert!(matches!(
        engine
            .list_by_user(
                &owner,
                "u1",
                ListSubmission {
                    page_size: Some(0),
                    ..ListSubmission::default()
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn station_listing_defaults_to_active_oldest_first() {
    let store = InMemoryStore::new();
    store.register_station(police_station("ps-cp", 28.63, 77.22));
    let clock = test_clock();
    let engine = fixtures::engine_with_clock(&store, &clock);

    let mut ids = Vec::new();
    for who in ["u1", "u2", "u3"] {
        let created = engine
            .create_ticket(
                &user(who),
                who,
                CreateTicketSubmission {
                    initial_location: Some(ping_at(28.61, 77.20, clock.now())),
                },
            )
            .await
            .unwrap();
        ids.push(created.ticket.ticket_id);
        clock.advance(chrono::Duration::minutes(1));
    }
    engine
        .close_ticket(&user("u2"), &ids[1].to_string())
        .await
        .unwrap();

    let queue = engine
        .list_by_station(&station("ps-cp"), "ps-cp", ListSubmission::default())
        .await
        .unwrap();
    assert_eq!(
        queue.iter().map(|t| t.ticket_id).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );
    assert_eq!(
        engine
            .list_by_station(&station("ps-other"), "ps-cp", ListSubmission::default())
            .await,
        Err(EngineError::Denied)
    );
}

#[tokio::test]
async fn media_listing_detail_and_lookup() {
    let store = InMemoryStore::new();
    let clock = test_clock();
    let engine = fixtures::engine_with_clock(&store, &clock);
    let owner = user("u1");
    let created = engine
        .create_ticket(
            &owner,
            "u1",
            CreateTicketSubmission {
                initial_location: Some(ping_at(28.61, 77.20, clock.now())),
            },
        )
        .await
        .unwrap();
    let id = created.ticket.ticket_id.to_string();

    let audio = engine.attach_media(&owner, &id, media("audio", "a1")).await.unwrap();
    engine.attach_media(&owner, &id, media("video", "v1")).await.unwrap();
    engine.attach_media(&owner, &id, media("audio", "a2")).await.unwrap();

    let audio_only = engine.list_media(&owner, &id, Some("AUDIO")).await.unwrap();
    assert_eq!(audio_only.len(), 2);
    assert!(audio_only.iter().all(|m| m.kind == MediaKind::Audio));
    assert!(matches!(
        engine.list_media(&owner, &id, Some("hologram")).await,
        Err(EngineError::Validation(_))
    ));

    let found = engine
        .get_attachment(&owner, &id, &audio.attachment().attachment_id.to_string())
        .await
        .unwrap();
    assert_eq!(&found, audio.attachment());
    assert_eq!(found.captured_at, clock.now());
    assert!(matches!(
        engine
            .get_attachment(&owner, &id, &kawach_core::AttachmentId::new().to_string())
            .await,
        Err(EngineError::NotFound { resource: "attachment", .. })
    ));

    let detail = engine.get_full_detail(&owner, &id).await.unwrap();
    assert_eq!(detail.ticket.ticket_id, created.ticket.ticket_id);
    assert_eq!(detail.locations.len(), 1);
    assert_eq!(detail.media.len(), 3);

    let summary = engine.get_summary(&owner, &id).await.unwrap();
    assert_eq!(summary.location_count, 1);
    assert_eq!(summary.media.of(MediaKind::Audio), 2);
    assert_eq!(summary.media.of(MediaKind::Video), 1);
    assert_eq!(summary.media.of(MediaKind::Image), 0);
}

#[tokio::test]
async fn notification_relay_forwards_lifecycle_changes_only() {
    let store = InMemoryStore::new();
    let clock = test_clock();
    let dispatcher = RecordingDispatcher::new();
    let (relay, worker) = NotificationRelay::spawn(Arc::new(dispatcher.clone()), 16);
    let engine = Engine::builder(Stores::from_backend(Arc::new(store.clone())))
        .clock(Arc::new(clock.clone()))
        .config(fixtures::fast_config())
        .sink(Arc::new(relay))
        .build();
    let owner = user("u1");

    let created = engine
        .create_ticket(&owner, "u1", CreateTicketSubmission::default())
        .await
        .unwrap();
    let id = created.ticket.ticket_id.to_string();
    engine
        .append_location(&owner, &id, ping_at(28.61, 77.20, clock.now()))
        .await
        .unwrap();
    engine.close_ticket(&owner, &id).await.unwrap();

    // Dropping the engine drops the last relay sender, so the worker drains and exits.
    drop(engine);
    worker.await.unwrap();

    let kinds: Vec<ChangeKind> = dispatcher.delivered().iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Created, ChangeKind::StatusChanged]);
}
