//! WebSocket Gateway
//!
//! In-process connection registry and fan-out. Tracks which connection
//! serves which user and which connections are subscribed to which rooms,
//! and delivers server events to them best-effort over their outbound
//! channels.
//!
//! All methods are synchronous; the internal locks are only ever held for
//! map access and never across an `.await`.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;
use crate::application::services::{MessageBroadcaster, MessageDto};

/// A registered connection with its outbound channel.
pub struct ConnectedSession {
    pub user_id: String,
    pub session_id: String,
    /// Rooms this connection currently receives events for. Guarded by a
    /// plain RwLock; critical sections are map lookups only.
    subscriptions: RwLock<HashSet<String>>,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectedSession {
    fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Connection registry for one server instance.
pub struct Gateway {
    /// Identifies this process in presence locators
    instance_id: String,
    /// Active sessions by session id
    sessions: DashMap<String, Arc<ConnectedSession>>,
    /// User id -> session ids (a user may hold several connections briefly
    /// around a reconnect)
    user_sessions: DashMap<String, Vec<String>>,
    /// Room id -> subscribed session ids
    room_sessions: DashMap<String, Vec<String>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            sessions: DashMap::new(),
            user_sessions: DashMap::new(),
            room_sessions: DashMap::new(),
        }
    }

    /// The presence locator for a session on this instance.
    pub fn locator(&self, session_id: &str) -> String {
        format!("{}/{}", self.instance_id, session_id)
    }

    /// Register a newly authenticated connection.
    pub fn register_session(
        &self,
        session_id: String,
        user_id: String,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let session = Arc::new(ConnectedSession {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            subscriptions: RwLock::new(HashSet::new()),
            sender,
        });

        self.sessions.insert(session_id.clone(), session);
        self.user_sessions
            .entry(user_id.clone())
            .or_default()
            .push(session_id.clone());

        tracing::info!(user_id = %user_id, session_id = %session_id, "Session registered");
    }

    /// Unregister a connection and drop all of its subscriptions.
    pub fn unregister_session(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            if let Some(mut sessions) = self.user_sessions.get_mut(&session.user_id) {
                sessions.retain(|s| s != session_id);
            }
            self.user_sessions
                .remove_if(&session.user_id, |_, sessions| sessions.is_empty());

            let rooms: Vec<String> = session.subscriptions.read().iter().cloned().collect();
            for room_id in rooms {
                self.drop_room_subscription(&room_id, session_id);
            }

            tracing::info!(
                user_id = %session.user_id,
                session_id = %session_id,
                "Session unregistered"
            );
        }
    }

    /// Subscribe a connection to a room. Returns false if the session is
    /// not registered.
    pub fn subscribe(&self, session_id: &str, room_id: &str) -> bool {
        // Clone the Arc out so no sessions shard guard is held while the
        // room index is written.
        let Some(session) = self.sessions.get(session_id).map(|s| s.value().clone()) else {
            return false;
        };

        if session.subscriptions.write().insert(room_id.to_string()) {
            self.room_sessions
                .entry(room_id.to_string())
                .or_default()
                .push(session_id.to_string());
        }
        true
    }

    /// Remove a connection's subscription to a room.
    pub fn unsubscribe(&self, session_id: &str, room_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.subscriptions.write().remove(room_id);
        }
        self.drop_room_subscription(room_id, session_id);
    }

    fn drop_room_subscription(&self, room_id: &str, session_id: &str) {
        if let Some(mut sessions) = self.room_sessions.get_mut(room_id) {
            sessions.retain(|s| s != session_id);
        }
        self.room_sessions
            .remove_if(room_id, |_, sessions| sessions.is_empty());
    }

    /// Whether a connection currently has a room in its subscription set.
    pub fn is_subscribed(&self, session_id: &str, room_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.subscriptions.read().contains(room_id))
            .unwrap_or(false)
    }

    /// Snapshot of a connection's subscriptions.
    pub fn subscriptions(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|s| s.subscriptions.read().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe every local connection of a user to a room.
    ///
    /// Used when the other party of a pair opens the room; returns how many
    /// connections were subscribed.
    pub fn subscribe_user(&self, user_id: &str, room_id: &str) -> usize {
        let session_ids: Vec<String> = self
            .user_sessions
            .get(user_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        session_ids
            .iter()
            .filter(|session_id| self.subscribe(session_id, room_id))
            .count()
    }

    /// Send an event to one connection.
    pub fn send_to_session(&self, session_id: &str, event: ServerEvent) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.send(event))
            .unwrap_or(false)
    }

    /// Send an event to every connection of a user. Returns whether at
    /// least one delivery was attempted successfully.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> bool {
        let session_ids: Vec<String> = self
            .user_sessions
            .get(user_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        let mut delivered = false;
        for session_id in session_ids {
            if let Some(session) = self.sessions.get(&session_id) {
                delivered |= session.send(event.clone());
            }
        }
        delivered
    }

    /// Deliver an event to every connection subscribed to a room.
    ///
    /// Best-effort: a closed receiver is skipped, not retried.
    pub fn broadcast_to_room(&self, room_id: &str, event: &ServerEvent) {
        self.broadcast_internal(room_id, event, None);
    }

    /// Deliver to a room, skipping one connection (e.g. the one leaving).
    pub fn broadcast_to_room_except(&self, room_id: &str, except: &str, event: &ServerEvent) {
        self.broadcast_internal(room_id, event, Some(except));
    }

    fn broadcast_internal(&self, room_id: &str, event: &ServerEvent, except: Option<&str>) {
        let session_ids: Vec<String> = self
            .room_sessions
            .get(room_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        for session_id in session_ids {
            if Some(session_id.as_str()) == except {
                continue;
            }
            if let Some(session) = self.sessions.get(&session_id) {
                if !session.send(event.clone()) {
                    tracing::debug!(
                        session_id = %session_id,
                        room_id = %room_id,
                        "Dropped event for closed connection"
                    );
                }
            }
        }
    }

    /// Number of registered connections.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a user has at least one connection on this instance.
    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.user_sessions
            .get(user_id)
            .map(|sessions| !sessions.is_empty())
            .unwrap_or(false)
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBroadcaster for Gateway {
    fn broadcast(&self, room_id: &str, message: &MessageDto) {
        let event = ServerEvent::NewMessage {
            from: message.sender_id.clone(),
            room: message.room_id.clone(),
            message: message.content.clone(),
            timestamp: message.timestamp.clone(),
        };
        self.broadcast_to_room(room_id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(gateway: &Gateway, session_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        gateway.register_session(session_id.to_string(), user_id.to_string(), tx);
        rx
    }

    fn status(code: u16) -> ServerEvent {
        ServerEvent::ConnectionStatus {
            message: "test".into(),
            code,
        }
    }

    #[test]
    fn test_register_and_send() {
        let gateway = Gateway::new();
        let mut rx = register(&gateway, "s1", "alice");

        assert!(gateway.send_to_session("s1", status(200)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::ConnectionStatus { code: 200, .. }
        ));
        assert!(!gateway.send_to_session("unknown", status(200)));
    }

    #[test]
    fn test_room_broadcast_reaches_only_subscribers() {
        let gateway = Gateway::new();
        let mut alice = register(&gateway, "s1", "alice");
        let mut bob = register(&gateway, "s2", "bob");
        let mut carol = register(&gateway, "s3", "carol");

        assert!(gateway.subscribe("s1", "alice-bob"));
        assert!(gateway.subscribe("s2", "alice-bob"));

        gateway.broadcast_to_room("alice-bob", &status(200));

        assert!(alice.try_recv().is_ok());
        assert!(bob.try_recv().is_ok());
        assert!(carol.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_except_skips_sender() {
        let gateway = Gateway::new();
        let mut alice = register(&gateway, "s1", "alice");
        let mut bob = register(&gateway, "s2", "bob");

        gateway.subscribe("s1", "alice-bob");
        gateway.subscribe("s2", "alice-bob");

        gateway.broadcast_to_room_except("alice-bob", "s1", &status(200));
        assert!(alice.try_recv().is_err());
        assert!(bob.try_recv().is_ok());
    }

    #[test]
    fn test_subscription_tracking() {
        let gateway = Gateway::new();
        let _rx = register(&gateway, "s1", "alice");

        assert!(!gateway.is_subscribed("s1", "alice-bob"));
        gateway.subscribe("s1", "alice-bob");
        assert!(gateway.is_subscribed("s1", "alice-bob"));

        gateway.unsubscribe("s1", "alice-bob");
        assert!(!gateway.is_subscribed("s1", "alice-bob"));
        assert!(!gateway.subscribe("ghost", "alice-bob"));
    }

    #[test]
    fn test_unregister_cleans_room_index() {
        let gateway = Gateway::new();
        let _alice = register(&gateway, "s1", "alice");
        let mut bob = register(&gateway, "s2", "bob");

        gateway.subscribe("s1", "alice-bob");
        gateway.subscribe("s2", "alice-bob");

        gateway.unregister_session("s1");
        assert!(!gateway.is_user_connected("alice"));
        assert_eq!(gateway.session_count(), 1);

        // Fan-out after unregistration only reaches the remaining session.
        gateway.broadcast_to_room("alice-bob", &status(200));
        assert!(bob.try_recv().is_ok());
    }

    #[test]
    fn test_subscribe_user_covers_all_connections() {
        let gateway = Gateway::new();
        let _first = register(&gateway, "s1", "bob");
        let _second = register(&gateway, "s2", "bob");

        assert_eq!(gateway.subscribe_user("bob", "alice-bob"), 2);
        assert!(gateway.is_subscribed("s1", "alice-bob"));
        assert!(gateway.is_subscribed("s2", "alice-bob"));
        assert_eq!(gateway.subscribe_user("offline", "alice-bob"), 0);
    }

    #[test]
    fn test_broadcaster_impl_formats_new_message() {
        let gateway = Gateway::new();
        let mut rx = register(&gateway, "s1", "alice");
        gateway.subscribe("s1", "alice-bob");

        let dto = MessageDto {
            id: "1".into(),
            room_id: "alice-bob".into(),
            sender_id: "bob".into(),
            content: "hi".into(),
            timestamp: "2025-01-01T00:00:00+00:00".into(),
        };
        MessageBroadcaster::broadcast(&gateway, "alice-bob", &dto);

        match rx.try_recv().unwrap() {
            ServerEvent::NewMessage { from, room, message, .. } => {
                assert_eq!(from, "bob");
                assert_eq!(room, "alice-bob");
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_locator_is_instance_scoped() {
        let gateway = Gateway::new();
        let other = Gateway::new();
        assert_ne!(gateway.locator("s1"), other.locator("s1"));
        assert_ne!(gateway.locator("s1"), gateway.locator("s2"));
    }
}
