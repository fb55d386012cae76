//! WebSocket Connection Handler
//!
//! Drives one connection through its lifecycle: the bearer credential from
//! the upgrade request is verified, presence is registered, the user's room
//! subscriptions are restored, and only then does the connection accept
//! chat events. Event failures are reported to the client and never tear
//! down the connection; only the authentication path is fatal.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;
use validator::Validate;

use super::events::{
    ClientEvent, EventParseError, JoinRoomPayload, RoomPayload, SendMessagePayload, ServerEvent,
};
use super::gateway::Gateway;
use super::session::ConnectionState;
use crate::application::services::{
    IdentityService, JwtIdentityVerifier, RelayError, RelayService, RelayServiceImpl, RoomError,
    RoomService, RoomServiceImpl,
};
use crate::domain::UserIdentity;
use crate::infrastructure::metrics;
use crate::infrastructure::presence::PresenceStore;
use crate::infrastructure::repositories::PgRoomRepository;
use crate::shared::validation::validation_message;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    // The credential is carried on the upgrade request; the socket itself
    // never transports it.
    let token = bearer_token(&headers);
    let max_message_size = state.settings.websocket.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, token))
}

/// Extract the bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.to_string())
}

/// Services a session task works with.
struct SessionContext {
    session_id: String,
    identity: UserIdentity,
    op_deadline: Duration,
    rooms: Arc<dyn RoomService>,
    relay: Arc<dyn RelayService>,
    presence: Arc<dyn PresenceStore>,
    gateway: Arc<Gateway>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// A fatal handshake failure.
struct Rejection {
    message: &'static str,
    code: u16,
    /// Metrics label
    reason: &'static str,
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let session_id = Uuid::new_v4().to_string();
    let mut conn = ConnectionState::new(session_id.clone());

    tracing::debug!(session_id = %session_id, "New WebSocket connection");

    // Split the socket so outbound events flow through a channel the
    // gateway can push into from other sessions.
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sink.send(Message::Text(event.to_frame().into())).await.is_err() {
                break;
            }
        }
    });

    let room_repo = Arc::new(PgRoomRepository::new(state.db.clone()));
    let rooms: Arc<dyn RoomService> = Arc::new(RoomServiceImpl::new(room_repo.clone()));
    let relay: Arc<dyn RelayService> =
        Arc::new(RelayServiceImpl::new(room_repo, state.gateway.clone()));

    let locator = state.gateway.locator(&session_id);
    let auth_deadline = Duration::from_secs(state.settings.websocket.auth_timeout_secs);

    // Connecting -> Authenticated -> Active, all under one deadline.
    let establish = establish_session(
        &mut conn,
        token.as_deref(),
        &locator,
        &state,
        rooms.as_ref(),
        &tx,
    );

    let restored = match timeout(auth_deadline, establish).await {
        Ok(Ok(restored)) => restored,
        Ok(Err(rejection)) => {
            metrics::record_rejection(rejection.reason);
            reject_connection(&conn, &locator, &state, rejection, &tx).await;
            sender_task.abort();
            return;
        }
        Err(_) => {
            metrics::record_rejection("timeout");
            let rejection = Rejection {
                message: "Connection setup timed out",
                code: 500,
                reason: "timeout",
            };
            reject_connection(&conn, &locator, &state, rejection, &tx).await;
            sender_task.abort();
            return;
        }
    };

    // A successful establishment always sets the identity.
    let Some(identity) = conn.identity().cloned() else {
        tracing::error!(session_id = %session_id, "Active connection without identity");
        state.gateway.unregister_session(&session_id);
        sender_task.abort();
        return;
    };

    metrics::CONNECTIONS_ACTIVE.inc();
    let _ = tx.send(ServerEvent::ConnectionStatus {
        message: format!(
            "Successfully connected to the chat server; {} room subscription(s) restored",
            restored
        ),
        code: 200,
    });

    tracing::info!(
        user_id = %identity.id,
        session_id = %session_id,
        restored_rooms = restored,
        "User connected"
    );

    let ctx = SessionContext {
        session_id: session_id.clone(),
        identity,
        op_deadline: Duration::from_secs(state.settings.websocket.op_timeout_secs),
        rooms,
        relay,
        presence: state.presence.clone(),
        gateway: state.gateway.clone(),
        tx,
    };

    // Active: plain read loop. Outbound traffic, including room broadcasts
    // from other sessions, arrives through the channel the sender task
    // drains.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => ctx.handle_frame(&text).await,
            Ok(Message::Close(_)) => {
                tracing::debug!(session_id = %session_id, "Connection closed by client");
                break;
            }
            Ok(_) => {} // Ping/Pong are answered by axum; binary is ignored
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Active -> Closed. In-flight events for this connection are dropped;
    // the persisted log is the recovery path.
    conn.closed();

    for room_id in ctx.gateway.subscriptions(&session_id) {
        ctx.gateway.broadcast_to_room_except(
            &room_id,
            &session_id,
            &ServerEvent::UserLeft {
                user_id: ctx.identity.id.clone(),
                room_id: room_id.clone(),
            },
        );
    }

    if let Err(e) = ctx.presence.clear(&ctx.identity.id, &locator).await {
        tracing::warn!(
            user_id = %ctx.identity.id,
            error = %e,
            "Failed to clear presence entry on disconnect"
        );
    }

    ctx.gateway.unregister_session(&session_id);
    metrics::CONNECTIONS_ACTIVE.dec();
    sender_task.abort();

    tracing::info!(
        user_id = %ctx.identity.id,
        session_id = %session_id,
        "User disconnected"
    );
}

/// Run the `Connecting -> Authenticated -> Active` sequence.
///
/// On success the connection is registered with the gateway, its presence
/// entry exists, and its prior room subscriptions are restored; returns how
/// many were restored. Any failure leaves a `Rejection` for the caller to
/// report and roll back.
async fn establish_session(
    conn: &mut ConnectionState,
    token: Option<&str>,
    locator: &str,
    state: &AppState,
    rooms: &dyn RoomService,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<usize, Rejection> {
    let session_id = conn.session_id().to_string();

    let token = token.ok_or(Rejection {
        message: "Authentication token not provided",
        code: 403,
        reason: "unauthenticated",
    })?;

    let verifier = JwtIdentityVerifier::new(state.settings.jwt.clone());
    let identity = verifier.verify(token).await.map_err(|e| {
        tracing::warn!(session_id = %session_id, error = %e, "Credential rejected");
        Rejection {
            message: "Invalid credentials",
            code: 403,
            reason: "unauthenticated",
        }
    })?;

    // Record the identity before any side effect so the rollback path can
    // always undo a partial handshake.
    conn.authenticated(identity.clone());

    // The presence entry must exist before the connection can go active.
    state
        .presence
        .register(&identity.id, locator)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %identity.id, error = %e, "Presence write failed");
            Rejection {
                message: "Failed to connect to the chat server",
                code: 500,
                reason: "store",
            }
        })?;

    state
        .gateway
        .register_session(session_id.clone(), identity.id.clone(), tx.clone());

    // Rejoin-on-reconnect: restore every room the user belongs to.
    let room_ids = rooms.list_rooms(&identity.id).await.map_err(|e| {
        tracing::error!(user_id = %identity.id, error = %e, "Room listing failed");
        Rejection {
            message: "Failed to connect to the chat server",
            code: 500,
            reason: "store",
        }
    })?;

    for room_id in &room_ids {
        state.gateway.subscribe(&session_id, room_id);
    }

    conn.activated();
    Ok(room_ids.len())
}

/// Report a fatal handshake failure and undo any partial registration.
async fn reject_connection(
    conn: &ConnectionState,
    locator: &str,
    state: &AppState,
    rejection: Rejection,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    tracing::warn!(
        session_id = %conn.session_id(),
        code = rejection.code,
        "Connection rejected: {}",
        rejection.message
    );

    let _ = tx.send(ServerEvent::ConnectionStatus {
        message: rejection.message.to_string(),
        code: rejection.code,
    });
    // Give the sender task a moment to flush the rejection frame.
    tokio::time::sleep(Duration::from_millis(100)).await;

    if let Some(user_id) = conn.user_id() {
        if let Err(e) = state.presence.clear(user_id, locator).await {
            tracing::warn!(user_id = %user_id, error = %e, "Presence rollback failed");
        }
        state.gateway.unregister_session(conn.session_id());
    }
}

impl SessionContext {
    fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Parse and dispatch one inbound frame.
    ///
    /// Failures are scoped to the operation: they produce a status event
    /// and leave the connection running.
    async fn handle_frame(&self, text: &str) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(EventParseError::InvalidPayload { event, reason }) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    event = event,
                    reason = %reason,
                    "Rejected malformed payload"
                );
                self.send(error_event(event, format!("Invalid payload: {}", reason), 400));
                return;
            }
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Discarding frame");
                return;
            }
        };

        match event {
            ClientEvent::JoinRoom(payload) => self.handle_join(payload).await,
            ClientEvent::SendMessage(payload) => self.handle_send(payload).await,
            ClientEvent::LeaveRoom(payload) => self.handle_leave(payload).await,
            ClientEvent::GetRoomDetails(payload) => self.handle_details(payload).await,
        }
    }

    async fn handle_join(&self, payload: JoinRoomPayload) {
        if let Err(errors) = payload.validate() {
            self.send(ServerEvent::JoinRoomStatus {
                message: validation_message(&errors),
                code: 400,
                room_id: None,
            });
            return;
        }

        let peer_id = payload.peer_user_id;
        let resolved = timeout(
            self.op_deadline,
            self.rooms.resolve_room(&self.identity.id, &peer_id),
        )
        .await;

        let room = match resolved {
            Ok(Ok(room)) => room,
            Ok(Err(RoomError::SameUser)) => {
                self.send(ServerEvent::JoinRoomStatus {
                    message: "A room needs two distinct users".into(),
                    code: 400,
                    room_id: None,
                });
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(
                    session_id = %self.session_id,
                    peer_id = %peer_id,
                    error = %e,
                    "Failed to resolve room"
                );
                self.send(ServerEvent::JoinRoomStatus {
                    message: "Failed to join the room".into(),
                    code: 500,
                    room_id: None,
                });
                return;
            }
            Err(_) => {
                self.send(ServerEvent::JoinRoomStatus {
                    message: "Timed out joining the room".into(),
                    code: 500,
                    room_id: None,
                });
                return;
            }
        };

        self.gateway.subscribe(&self.session_id, &room.room_id);

        // Subscribe the peer too if they are reachable. Failures here are
        // logged only; the peer can always resolve the room themselves.
        match timeout(self.op_deadline, self.presence.locate(&peer_id)).await {
            Ok(Ok(Some(_))) => {
                let subscribed = self.gateway.subscribe_user(&peer_id, &room.room_id);
                if subscribed > 0 {
                    self.gateway.send_to_user(
                        &peer_id,
                        ServerEvent::JoinRoomStatus {
                            message: format!("{} opened a room with you", self.identity.name),
                            code: 200,
                            room_id: Some(room.room_id.clone()),
                        },
                    );
                }
            }
            Ok(Ok(None)) => {
                // Peer offline: they will be resubscribed on reconnect.
            }
            Ok(Err(e)) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "Presence lookup failed during join");
            }
            Err(_) => {
                tracing::warn!(peer_id = %peer_id, "Presence lookup timed out during join");
            }
        }

        self.send(ServerEvent::JoinRoomStatus {
            message: "Joined the room".into(),
            code: 200,
            room_id: Some(room.room_id),
        });
    }

    async fn handle_send(&self, payload: SendMessagePayload) {
        if let Err(errors) = payload.validate() {
            self.send(ServerEvent::SendMessageError {
                message: validation_message(&errors),
                code: 400,
            });
            return;
        }

        // Never trust a client-supplied room claim: the connection must
        // currently hold the subscription.
        if !self.gateway.is_subscribed(&self.session_id, &payload.room_id) {
            self.send(ServerEvent::SendMessageError {
                message: "Not subscribed to this room".into(),
                code: 403,
            });
            return;
        }

        let relayed = timeout(
            self.op_deadline,
            self.relay
                .relay(&payload.room_id, &self.identity.id, &payload.content),
        )
        .await;

        match relayed {
            // The broadcast included this connection, so no extra ack.
            Ok(Ok(_)) => {}
            Ok(Err(e @ (RelayError::EmptyContent | RelayError::ContentTooLong))) => {
                self.send(ServerEvent::SendMessageError {
                    message: e.to_string(),
                    code: 400,
                });
            }
            Ok(Err(RelayError::RoomNotFound)) => {
                self.send(ServerEvent::SendMessageError {
                    message: "Room not found".into(),
                    code: 404,
                });
            }
            Ok(Err(RelayError::Store(e))) => {
                tracing::error!(
                    session_id = %self.session_id,
                    room_id = %payload.room_id,
                    error = %e,
                    "Failed to persist message"
                );
                self.send(ServerEvent::SendMessageError {
                    message: "Failed to send message".into(),
                    code: 500,
                });
            }
            Err(_) => {
                self.send(ServerEvent::SendMessageError {
                    message: "Timed out sending message".into(),
                    code: 500,
                });
            }
        }
    }

    async fn handle_leave(&self, payload: RoomPayload) {
        if let Err(errors) = payload.validate() {
            self.send(ServerEvent::LeaveRoomStatus {
                message: validation_message(&errors),
                code: 400,
            });
            return;
        }

        let left = timeout(
            self.op_deadline,
            self.rooms.leave_room(&payload.room_id, &self.identity.id),
        )
        .await;

        match left {
            Ok(Ok(_removal)) => {
                self.gateway.broadcast_to_room_except(
                    &payload.room_id,
                    &self.session_id,
                    &ServerEvent::UserLeft {
                        user_id: self.identity.id.clone(),
                        room_id: payload.room_id.clone(),
                    },
                );
                self.gateway.unsubscribe(&self.session_id, &payload.room_id);
                self.send(ServerEvent::LeaveRoomStatus {
                    message: "Left the room".into(),
                    code: 200,
                });
            }
            Ok(Err(RoomError::NotFound)) => {
                self.send(ServerEvent::LeaveRoomStatus {
                    message: "Room not found".into(),
                    code: 404,
                });
            }
            Ok(Err(e)) => {
                tracing::error!(
                    session_id = %self.session_id,
                    room_id = %payload.room_id,
                    error = %e,
                    "Failed to leave room"
                );
                self.send(ServerEvent::LeaveRoomStatus {
                    message: "Failed to leave the room".into(),
                    code: 500,
                });
            }
            Err(_) => {
                self.send(ServerEvent::LeaveRoomStatus {
                    message: "Timed out leaving the room".into(),
                    code: 500,
                });
            }
        }
    }

    async fn handle_details(&self, payload: RoomPayload) {
        if let Err(errors) = payload.validate() {
            self.send(ServerEvent::RoomDetailsError {
                message: validation_message(&errors),
                code: 400,
            });
            return;
        }

        let details = timeout(
            self.op_deadline,
            self.rooms.room_details(&payload.room_id, &self.identity.id),
        )
        .await;

        match details {
            Ok(Ok(room)) => self.send(ServerEvent::RoomDetails { room }),
            Ok(Err(RoomError::NotFound)) => {
                self.send(ServerEvent::RoomDetailsError {
                    message: "Room not found".into(),
                    code: 404,
                });
            }
            Ok(Err(RoomError::NotAMember)) => {
                self.send(ServerEvent::RoomDetailsError {
                    message: "Not a member of this room".into(),
                    code: 403,
                });
            }
            Ok(Err(e)) => {
                tracing::error!(
                    session_id = %self.session_id,
                    room_id = %payload.room_id,
                    error = %e,
                    "Failed to load room details"
                );
                self.send(ServerEvent::RoomDetailsError {
                    message: "Failed to load room details".into(),
                    code: 500,
                });
            }
            Err(_) => {
                self.send(ServerEvent::RoomDetailsError {
                    message: "Timed out loading room details".into(),
                    code: 500,
                });
            }
        }
    }
}

/// The error event matching a client event name.
fn error_event(event: &str, message: String, code: u16) -> ServerEvent {
    match event {
        "join-room" => ServerEvent::JoinRoomStatus {
            message,
            code,
            room_id: None,
        },
        "leave-room" => ServerEvent::LeaveRoomStatus { message, code },
        "get-room-details" => ServerEvent::RoomDetailsError { message, code },
        _ => ServerEvent::SendMessageError { message, code },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use crate::domain::{MockRoomRepository, Role};
    use crate::infrastructure::presence::InMemoryPresenceStore;
    use crate::shared::error::AppError;

    /// An active session context wired to mock stores, plus the receiver
    /// that observes what the client would be sent.
    fn active_context(
        repo: MockRoomRepository,
    ) -> (SessionContext, mpsc::UnboundedReceiver<ServerEvent>) {
        let gateway = Arc::new(Gateway::new());
        let (tx, rx) = mpsc::unbounded_channel();
        gateway.register_session("s1".into(), "alice".into(), tx.clone());

        let repo = Arc::new(repo);
        let ctx = SessionContext {
            session_id: "s1".into(),
            identity: UserIdentity {
                id: "alice".into(),
                name: "Alice".into(),
                role: Role::User,
            },
            op_deadline: Duration::from_secs(1),
            rooms: Arc::new(RoomServiceImpl::new(repo.clone())),
            relay: Arc::new(RelayServiceImpl::new(repo, gateway.clone())),
            presence: Arc::new(InMemoryPresenceStore::new()),
            gateway,
            tx,
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_send_to_unsubscribed_room_is_rejected() {
        let mut repo = MockRoomRepository::new();
        repo.expect_append_message().never();
        let (ctx, mut rx) = active_context(repo);

        ctx.handle_frame(r#"{"event":"send-message","data":{"roomId":"alice-bob","content":"hi"}}"#)
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::SendMessageError { code, .. } => assert_eq!(code, 403),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_persistence_failure_reports_to_sender() {
        let mut repo = MockRoomRepository::new();
        repo.expect_append_message()
            .returning(|_, _, _| Err(AppError::Internal("insert failed".into())));
        let (ctx, mut rx) = active_context(repo);
        ctx.gateway.subscribe("s1", "alice-bob");

        ctx.handle_frame(r#"{"event":"send-message","data":{"roomId":"alice-bob","content":"hi"}}"#)
            .await;

        // The only event the sender sees is the scoped error; nothing was
        // broadcast.
        match rx.try_recv().unwrap() {
            ServerEvent::SendMessageError { code, .. } => assert_eq!(code, 500),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_with_self_is_rejected() {
        let mut repo = MockRoomRepository::new();
        repo.expect_create_or_update().never();
        let (ctx, mut rx) = active_context(repo);

        ctx.handle_frame(r#"{"event":"join-room","data":{"peerUserId":"alice"}}"#)
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::JoinRoomStatus { code, room_id, .. } => {
                assert_eq!(code, 400);
                assert!(room_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_yields_scoped_error() {
        let (ctx, mut rx) = active_context(MockRoomRepository::new());

        ctx.handle_frame(r#"{"event":"get-room-details","data":{"roomId":7}}"#)
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::RoomDetailsError { code, .. } => assert_eq!(code, 400),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_bearer_token_missing_or_malformed() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_error_event_matches_operation() {
        assert!(matches!(
            error_event("join-room", "bad".into(), 400),
            ServerEvent::JoinRoomStatus { code: 400, .. }
        ));
        assert!(matches!(
            error_event("leave-room", "bad".into(), 400),
            ServerEvent::LeaveRoomStatus { code: 400, .. }
        ));
        assert!(matches!(
            error_event("get-room-details", "bad".into(), 400),
            ServerEvent::RoomDetailsError { code: 400, .. }
        ));
        assert!(matches!(
            error_event("send-message", "bad".into(), 400),
            ServerEvent::SendMessageError { code: 400, .. }
        ));
    }
}
