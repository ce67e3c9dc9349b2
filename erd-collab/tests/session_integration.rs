//! End-to-end host/guest tests over the in-process relay.

use std::sync::Arc;

use erd_collab::crypto::{decrypt_from_json, encrypt_to_json, export_key, generate_key, import_key};
use erd_collab::SchemaRepository;
use erd_collab::protocol::{DispatchPayload, SchemaRequest};
use erd_collab::{
    CollabConfig, CollabEvent, ConnectionState, DocumentId, Frame, GuestSession, LoopbackRelay,
    MemoryRepository, PeerId, ReplicationBatch, SessionManager, ShareDescriptor, TransportConfig,
};
use erd_core::{Action, Column, Relationship, RelationshipPoint, SchemaState, Store, Table};
use tokio::time::{sleep, timeout, Duration};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Host {
    relay: LoopbackRelay,
    repository: Arc<MemoryRepository>,
    store: Arc<Store>,
    manager: SessionManager,
    doc: DocumentId,
}

fn host_with_orders() -> Host {
    let relay = LoopbackRelay::new();
    let repository = Arc::new(MemoryRepository::new());
    let store = Arc::new(Store::new(SchemaState::new()).unwrap());
    store.dispatch_all([
        Action::AddTable {
            table: Table::new("t1", "orders"),
        },
        Action::AddColumn {
            column: Column::new("c1", "t1", "id").with_data_type("INT"),
        },
    ]);
    let doc = DocumentId::new("doc-1");
    repository.insert(doc.clone(), store.clone());
    let manager = SessionManager::new(
        relay.connector(),
        repository.clone(),
        CollabConfig::for_testing(),
    );
    Host {
        relay,
        repository,
        store,
        manager,
        doc,
    }
}

fn join(host: &Host, share: &ShareDescriptor) -> GuestSession {
    let store = Arc::new(Store::new(SchemaState::new()).unwrap());
    GuestSession::join(
        host.relay.connector(),
        TransportConfig::for_testing(),
        share,
        store,
    )
    .unwrap()
}

async fn eventually(store: &Store, check: impl Fn(&SchemaState) -> bool) -> bool {
    timeout(Duration::from_secs(2), async {
        while !store.read(&check) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

fn table_name(state: &SchemaState, id: &str) -> Option<String> {
    state.table(id).map(|t| t.name.clone())
}

#[tokio::test]
async fn test_start_stop_releases_room_and_transport() {
    init_logger();
    let host = host_with_orders();
    let mut events = host.manager.subscribe();

    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    sleep(Duration::from_millis(20)).await;
    assert!(host.relay.has_room(&share.room_id));
    assert!(matches!(
        events.recv().await.unwrap(),
        CollabEvent::SessionStarted { .. }
    ));

    host.manager.stop_session(&host.doc);
    assert!(host.manager.session_all().is_empty());
    assert_eq!(host.manager.room_count(), 0);
    assert!(!host.manager.has_transport());
    assert_eq!(host.manager.connection_state(), ConnectionState::Disconnected);

    sleep(Duration::from_millis(20)).await;
    assert!(!host.relay.has_room(&share.room_id));
    assert_eq!(host.relay.connection_count(), 0);
    assert!(matches!(
        events.recv().await.unwrap(),
        CollabEvent::SessionStopped { .. }
    ));
}

#[tokio::test]
async fn test_transport_reopens_after_last_stop() {
    init_logger();
    let host = host_with_orders();
    host.manager.start_session(host.doc.clone()).unwrap();
    host.manager.stop_session(&host.doc);
    assert!(!host.manager.has_transport());

    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    sleep(Duration::from_millis(20)).await;
    assert!(host.relay.has_room(&share.room_id));
}

#[tokio::test]
async fn test_guest_handshake_loads_snapshot() {
    init_logger();
    let host = host_with_orders();
    // Off-grid coordinates and a relationship whose anchors are derived.
    host.store.dispatch_all([
        Action::AddTable {
            table: Table::new("t2", "customers").at(985.6906946328695, 17.300000000000004),
        },
        Action::AddColumn {
            column: Column::new("c2", "t2", "order_id").with_data_type("INT"),
        },
        Action::AddRelationship {
            relationship: Relationship::new(
                "r1",
                RelationshipPoint::new("t1", ["c1"]),
                RelationshipPoint::new("t2", ["c2"]),
            ),
        },
    ]);
    sleep(Duration::from_millis(100)).await;

    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);

    let guest = join(&host, &share);
    assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());

    let expected = host.repository.get(&host.doc).unwrap();
    assert_eq!(guest.store().state(), expected);
    assert_eq!(table_name(&expected, "t1").as_deref(), Some("orders"));

    // The guest's own hooks derive the same values and write nothing.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(guest.store().state(), expected);
}

#[tokio::test]
async fn test_live_edit_reaches_guest() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let guest = join(&host, &share);
    assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());

    let rename = Action::ChangeTableName {
        id: "t1".into(),
        name: "users".into(),
    };
    host.store.dispatch(rename.clone());
    assert!(host.manager.dispatch(&host.doc, &[rename]).unwrap());

    assert!(eventually(guest.store(), |s| table_name(s, "t1").as_deref() == Some("users")).await);
}

#[tokio::test]
async fn test_guest_edit_replicates_to_host() {
    init_logger();
    let host = host_with_orders();
    let mut events = host.manager.subscribe();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let guest = join(&host, &share);
    assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());

    let comment = Action::ChangeTableComment {
        id: "t1".into(),
        comment: "customer orders".into(),
    };
    guest.store().dispatch(comment.clone());
    guest.dispatch(&[comment.clone()]).unwrap();

    assert!(eventually(&host.store, |s| s.table("t1").unwrap().comment == "customer orders").await);

    let replicated = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(CollabEvent::Replicated { actions, .. }) = events.recv().await {
                return actions;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(replicated, vec![comment]);
}

#[tokio::test]
async fn test_two_guests_see_each_other() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let alice = join(&host, &share);
    let bob = join(&host, &share);
    for guest in [&alice, &bob] {
        assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());
    }

    alice
        .dispatch(&[Action::ChangeTableName {
            id: "t1".into(),
            name: "purchases".into(),
        }])
        .unwrap();

    assert!(eventually(bob.store(), |s| table_name(s, "t1").as_deref() == Some("purchases")).await);
    assert!(eventually(&host.store, |s| table_name(s, "t1").as_deref() == Some("purchases")).await);
}

#[tokio::test]
async fn test_edit_during_join_reaches_new_guest() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let alice = join(&host, &share);
    assert!(timeout(Duration::from_secs(2), alice.wait_loaded()).await.unwrap());

    for round in 0..10 {
        let name = format!("purchases{round}");
        let bob = join(&host, &share);
        alice
            .dispatch(&[Action::ChangeTableName {
                id: "t1".into(),
                name: name.clone(),
            }])
            .unwrap();

        assert!(timeout(Duration::from_secs(2), bob.wait_loaded()).await.unwrap());
        assert!(eventually(&host.store, |s| table_name(s, "t1").as_deref() == Some(name.as_str())).await);
        assert!(eventually(bob.store(), |s| table_name(s, "t1").as_deref() == Some(name.as_str())).await);
        bob.leave();
    }
}

#[tokio::test]
async fn test_guest_does_not_reapply_its_own_edit() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let alice = join(&host, &share);
    let bob = join(&host, &share);
    for guest in [&alice, &bob] {
        assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());
    }

    let drag = Action::MoveTable {
        id: "t1".into(),
        move_x: 15.0,
        move_y: 0.0,
    };
    alice.store().dispatch(drag.clone());
    alice.dispatch(&[drag]).unwrap();

    assert!(eventually(bob.store(), |s| s.table("t1").unwrap().ui.x == 15.0).await);
    assert!(eventually(&host.store, |s| s.table("t1").unwrap().ui.x == 15.0).await);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.store().read(|s| s.table("t1").unwrap().ui.x), 15.0);
}

#[tokio::test]
async fn test_reconnect_rejoins_and_reloads() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    let guest = join(&host, &share);
    assert!(timeout(Duration::from_secs(2), guest.wait_loaded()).await.unwrap());

    // Edit made while the link is down never reaches the guest directly.
    host.relay.drop_connections();
    host.store.dispatch(Action::ChangeTableName {
        id: "t1".into(),
        name: "offline".into(),
    });

    // Both sides reconnect; the guest re-requests and gets the fresh snapshot.
    assert!(eventually(guest.store(), |s| table_name(s, "t1").as_deref() == Some("offline")).await);
    assert!(host.relay.has_room(&share.room_id));
    assert_eq!(guest.connection_state(), ConnectionState::Connected);

    let rename = Action::ChangeTableName {
        id: "t1".into(),
        name: "online".into(),
    };
    host.store.dispatch(rename.clone());
    assert!(host.manager.dispatch(&host.doc, &[rename]).unwrap());
    assert!(eventually(guest.store(), |s| table_name(s, "t1").as_deref() == Some("online")).await);
}

#[tokio::test]
async fn test_wrong_key_never_loads() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);

    let forged = ShareDescriptor {
        room_id: share.room_id.clone(),
        secret_key: export_key(&generate_key()),
    };
    let guest = join(&host, &forged);
    assert!(timeout(Duration::from_millis(200), guest.wait_loaded()).await.is_err());
    assert!(guest.store().read(|s| s.tables.is_empty()));
}

#[tokio::test]
async fn test_duplicate_batches_are_dropped() {
    init_logger();
    let host = host_with_orders();
    let share = host.manager.start_session(host.doc.clone()).unwrap();
    assert!(host.manager.wait_connected().await);
    sleep(Duration::from_millis(20)).await;

    let key = import_key(&share.secret_key).unwrap();
    let (_, mut moves) = host.store.subscribe_filtered(erd_core::ActionSet::STREAM);

    let mut raw = host.relay.connect();
    raw.outgoing
        .send(Frame::GuestJoinRoom(share.room_id.clone()))
        .unwrap();

    let batch = ReplicationBatch {
        sender: PeerId::new("raw"),
        seq: 1,
        origin: None,
        actions: vec![Action::MoveTable {
            id: "t1".into(),
            move_x: 10.0,
            move_y: 0.0,
        }],
    };
    let frame = Frame::Dispatch(DispatchPayload {
        room_id: share.room_id.clone(),
        value: encrypt_to_json(&serde_json::to_string(&batch).unwrap(), &key).unwrap(),
    });
    raw.outgoing.send(frame.clone()).unwrap();
    raw.outgoing.send(frame).unwrap();

    assert!(timeout(Duration::from_secs(2), moves.recv()).await.unwrap().is_some());
    sleep(Duration::from_millis(50)).await;
    assert!(moves.try_recv().is_err());
    let snapshot = host.repository.get(&host.doc).unwrap();
    assert_eq!(snapshot.table("t1").unwrap().ui.x, 10.0);

    // The host relays the accepted batch once, under its own sequence.
    let Frame::Dispatch(relayed) = timeout(Duration::from_secs(2), raw.incoming.recv())
        .await
        .unwrap()
        .unwrap()
    else {
        panic!("expected a relayed dispatch");
    };
    let relayed: ReplicationBatch =
        serde_json::from_str(&decrypt_from_json(&relayed.value, &key).unwrap()).unwrap();
    assert_eq!(&relayed.sender, host.manager.peer_id());
    assert_eq!(relayed.origin, Some(PeerId::new("raw")));
    assert_eq!(relayed.actions, batch.actions);

    // Unknown rooms and garbage envelopes are ignored without side effects.
    raw.outgoing
        .send(Frame::RequestHostSchema(SchemaRequest {
            room_id: "no-such-room".into(),
            peer_id: None,
        }))
        .unwrap();
    raw.outgoing
        .send(Frame::Dispatch(DispatchPayload {
            room_id: share.room_id.clone(),
            value: encrypt_to_json("not a batch", &generate_key()).unwrap(),
        }))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(raw.incoming.try_recv().is_err());
    assert!(host.manager.has_session(&host.doc));
}
