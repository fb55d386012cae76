//! Chat Core Scenarios
//!
//! Exercises room resolution, relay, membership, and presence together,
//! backed by the in-memory fakes from `common`.

use std::sync::Arc;

use chrono::DateTime;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use chat_relay::application::services::{
    RelayError, RelayService, RelayServiceImpl, RoomError, RoomService, RoomServiceImpl,
};
use chat_relay::infrastructure::presence::{InMemoryPresenceStore, PresenceStore};
use chat_relay::presentation::websocket::{Gateway, ServerEvent};

use crate::common::InMemoryRoomRepository;

fn room_service(repo: &Arc<InMemoryRoomRepository>) -> RoomServiceImpl<InMemoryRoomRepository> {
    RoomServiceImpl::new(repo.clone())
}

fn relay_service(
    repo: &Arc<InMemoryRoomRepository>,
    gateway: &Arc<Gateway>,
) -> RelayServiceImpl<InMemoryRoomRepository, Gateway> {
    RelayServiceImpl::new(repo.clone(), gateway.clone())
}

fn connect(gateway: &Gateway, session_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    gateway.register_session(session_id.to_string(), user_id.to_string(), tx);
    rx
}

#[tokio::test]
async fn concurrent_join_by_both_parties_creates_one_room() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let rooms = room_service(&repo);

    let (first, second) = tokio::join!(
        rooms.resolve_room("alice", "bob"),
        rooms.resolve_room("bob", "alice"),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.room_id, second.room_id);
    assert_eq!(repo.room_count(), 1);
    assert_eq!(first.member_ids, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn resolve_room_twice_is_idempotent() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let rooms = room_service(&repo);

    let once = rooms.resolve_room("alice", "bob").await.unwrap();
    let again = rooms.resolve_room("alice", "bob").await.unwrap();

    assert_eq!(once.room_id, again.room_id);
    assert_eq!(repo.room_count(), 1);
}

#[tokio::test]
async fn resolve_room_repairs_one_sided_record() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let rooms = room_service(&repo);

    let room = rooms.resolve_room("alice", "bob").await.unwrap();
    rooms.leave_room(&room.room_id, "bob").await.unwrap();

    let details = rooms.room_details(&room.room_id, "alice").await.unwrap();
    assert_eq!(details.member_ids, vec!["alice".to_string()]);

    // A fresh join by either party restores both members on the same record.
    let repaired = rooms.resolve_room("bob", "alice").await.unwrap();
    assert_eq!(repaired.room_id, room.room_id);
    assert_eq!(repaired.member_ids, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(repo.room_count(), 1);
}

#[tokio::test]
async fn sent_message_appears_last_with_server_timestamp() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let gateway = Arc::new(Gateway::new());
    let rooms = room_service(&repo);
    let relay = relay_service(&repo, &gateway);

    let room = rooms.resolve_room("alice", "bob").await.unwrap();
    relay.relay(&room.room_id, "alice", "first").await.unwrap();
    relay.relay(&room.room_id, "bob", "second").await.unwrap();

    let details = rooms.room_details(&room.room_id, "alice").await.unwrap();
    assert_eq!(details.messages.len(), 2);

    let last = details.messages.last().unwrap();
    assert_eq!(last.content, "second");
    assert_eq!(last.sender_id, "bob");
    // Timestamp was assigned at persistence time, not taken from the client.
    assert!(DateTime::parse_from_rfc3339(&last.timestamp).is_ok());
}

#[tokio::test]
async fn broadcast_reaches_subscribed_connections_only() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let gateway = Arc::new(Gateway::new());
    let rooms = room_service(&repo);
    let relay = relay_service(&repo, &gateway);

    let room = rooms.resolve_room("alice", "bob").await.unwrap();

    let mut alice_rx = connect(&gateway, "s-alice", "alice");
    let mut bob_rx = connect(&gateway, "s-bob", "bob");
    let mut carol_rx = connect(&gateway, "s-carol", "carol");

    gateway.subscribe("s-alice", &room.room_id);
    gateway.subscribe("s-bob", &room.room_id);

    relay.relay(&room.room_id, "alice", "hello").await.unwrap();

    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.try_recv().unwrap() {
            ServerEvent::NewMessage { from, room: room_id, message, .. } => {
                assert_eq!(from, "alice");
                assert_eq!(room_id, room.room_id);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(carol_rx.try_recv().is_err());
}

#[tokio::test]
async fn persistence_failure_suppresses_broadcast() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let gateway = Arc::new(Gateway::new());
    let rooms = room_service(&repo);
    let relay = relay_service(&repo, &gateway);

    let room = rooms.resolve_room("alice", "bob").await.unwrap();
    let mut bob_rx = connect(&gateway, "s-bob", "bob");
    gateway.subscribe("s-bob", &room.room_id);

    repo.set_append_failure(true);
    let result = relay.relay(&room.room_id, "alice", "lost").await;

    assert!(matches!(result, Err(RelayError::Store(_))));
    assert!(bob_rx.try_recv().is_err());

    // The store coming back makes the same send succeed.
    repo.set_append_failure(false);
    relay.relay(&room.room_id, "alice", "retried").await.unwrap();
    assert!(matches!(
        bob_rx.try_recv().unwrap(),
        ServerEvent::NewMessage { .. }
    ));
}

#[tokio::test]
async fn leaving_shrinks_membership_then_deletes_room() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let rooms = room_service(&repo);

    let room = rooms.resolve_room("alice", "bob").await.unwrap();

    rooms.leave_room(&room.room_id, "bob").await.unwrap();
    let details = rooms.room_details(&room.room_id, "alice").await.unwrap();
    assert_eq!(details.member_ids, vec!["alice".to_string()]);

    rooms.leave_room(&room.room_id, "alice").await.unwrap();
    assert_eq!(repo.room_count(), 0);
    assert!(matches!(
        rooms.room_details(&room.room_id, "alice").await,
        Err(RoomError::NotFound)
    ));
}

#[tokio::test]
async fn disconnect_clears_presence_and_reconnect_gets_new_locator() {
    let presence = InMemoryPresenceStore::new();
    let gateway = Gateway::new();

    let first = gateway.locator("session-1");
    tokio_test::assert_ok!(presence.register("alice", &first).await);
    assert_eq!(presence.locate("alice").await.unwrap().as_deref(), Some(first.as_str()));

    tokio_test::assert_ok!(presence.clear("alice", &first).await);
    assert_eq!(presence.locate("alice").await.unwrap(), None);

    let second = gateway.locator("session-2");
    tokio_test::assert_ok!(presence.register("alice", &second).await);
    let located = presence.locate("alice").await.unwrap().unwrap();
    assert_eq!(located, second);
    assert_ne!(located, first);
}

#[tokio::test]
async fn reconnect_restores_room_subscriptions() {
    let repo = Arc::new(InMemoryRoomRepository::new());
    let gateway = Arc::new(Gateway::new());
    let rooms = room_service(&repo);

    rooms.resolve_room("bob", "alice").await.unwrap();
    rooms.resolve_room("bob", "carol").await.unwrap();

    // A fresh connection resubscribes to everything the directory lists.
    let _rx = connect(&gateway, "s-bob-2", "bob");
    let room_ids = rooms.list_rooms("bob").await.unwrap();
    assert_eq!(room_ids.len(), 2);
    for room_id in &room_ids {
        gateway.subscribe("s-bob-2", room_id);
    }

    assert!(gateway.is_subscribed("s-bob-2", "alice-bob"));
    assert!(gateway.is_subscribed("s-bob-2", "bob-carol"));
}
