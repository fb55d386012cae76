//! WebSocket Event Types
//!
//! JSON event frames exchanged with chat clients. Both directions use the
//! shape `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::application::services::RoomDetailsDto;

/// Payload for `join-room`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    /// The user to open a room with
    #[validate(length(min = 1, message = "must not be empty"))]
    pub peer_user_id: String,
}

/// Payload for `send-message`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub room_id: String,

    #[validate(length(min = 1, max = 4000, message = "must be 1 to 4000 characters"))]
    pub content: String,
}

/// Payload for `leave-room` and `get-room-details`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub room_id: String,
}

/// Events a client may emit once the connection is active.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    JoinRoom(JoinRoomPayload),
    SendMessage(SendMessagePayload),
    LeaveRoom(RoomPayload),
    GetRoomDetails(RoomPayload),
}

/// Why an inbound frame could not be turned into a `ClientEvent`.
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

/// Raw frame envelope, parsed before the payload is interpreted so payload
/// errors can still be attributed to their event.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    /// Parse a text frame into a typed client event.
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| EventParseError::InvalidJson(e.to_string()))?;

        fn payload<T: serde::de::DeserializeOwned>(
            event: &'static str,
            data: serde_json::Value,
        ) -> Result<T, EventParseError> {
            serde_json::from_value(data).map_err(|e| EventParseError::InvalidPayload {
                event,
                reason: e.to_string(),
            })
        }

        match frame.event.as_str() {
            "join-room" => Ok(Self::JoinRoom(payload("join-room", frame.data)?)),
            "send-message" => Ok(Self::SendMessage(payload("send-message", frame.data)?)),
            "leave-room" => Ok(Self::LeaveRoom(payload("leave-room", frame.data)?)),
            "get-room-details" => {
                Ok(Self::GetRoomDetails(payload("get-room-details", frame.data)?))
            }
            other => Err(EventParseError::UnknownEvent(other.to_string())),
        }
    }
}

/// Events the server emits to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Result of the connection handshake, or a fatal connection error.
    ConnectionStatus { message: String, code: u16 },

    /// Result of a `join-room` request; also sent to the peer when they are
    /// subscribed into a room by the other party.
    #[serde(rename_all = "camelCase")]
    JoinRoomStatus {
        message: String,
        code: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Result of a `leave-room` request.
    LeaveRoomStatus { message: String, code: u16 },

    /// A message was appended to a room this connection is subscribed to.
    NewMessage {
        from: String,
        room: String,
        message: String,
        timestamp: String,
    },

    /// A `send-message` request was rejected.
    SendMessageError { message: String, code: u16 },

    /// Result of a successful `get-room-details` request.
    RoomDetails { room: RoomDetailsDto },

    /// A `get-room-details` request was rejected.
    RoomDetailsError { message: String, code: u16 },

    /// Another member's connection left a shared room or disconnected.
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: String, room_id: String },
}

impl ServerEvent {
    /// Serialize the event into a text frame.
    ///
    /// Serialization of these variants cannot fail; the fallback covers the
    /// impossible path without panicking in the send loop.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize server event: {}", e);
            r#"{"event":"connection-status","data":{"message":"Internal error","code":500}}"#.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_join_room() {
        let event =
            ClientEvent::parse(r#"{"event":"join-room","data":{"peerUserId":"bob"}}"#).unwrap();
        match event {
            ClientEvent::JoinRoom(payload) => assert_eq!(payload.peer_user_id, "bob"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_message() {
        let event = ClientEvent::parse(
            r#"{"event":"send-message","data":{"roomId":"alice-bob","content":"hi"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.room_id, "alice-bob");
                assert_eq!(payload.content, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_event() {
        let err = ClientEvent::parse(r#"{"event":"shrug","data":{}}"#).unwrap_err();
        assert!(matches!(err, EventParseError::UnknownEvent(name) if name == "shrug"));
    }

    #[test]
    fn test_parse_invalid_payload_names_the_event() {
        let err = ClientEvent::parse(r#"{"event":"send-message","data":{"roomId":42}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            EventParseError::InvalidPayload { event: "send-message", .. }
        ));
    }

    #[test]
    fn test_parse_missing_data_defaults_to_null() {
        let err = ClientEvent::parse(r#"{"event":"leave-room"}"#).unwrap_err();
        assert!(matches!(err, EventParseError::InvalidPayload { event: "leave-room", .. }));
    }

    #[test]
    fn test_server_event_frame_shape() {
        let frame = ServerEvent::JoinRoomStatus {
            message: "Joined".into(),
            code: 200,
            room_id: Some("alice-bob".into()),
        }
        .to_frame();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "join-room-status");
        assert_eq!(value["data"]["roomId"], "alice-bob");
        assert_eq!(value["data"]["code"], 200);
    }

    #[test]
    fn test_new_message_event_name() {
        let frame = ServerEvent::NewMessage {
            from: "alice".into(),
            room: "alice-bob".into(),
            message: "hi".into(),
            timestamp: "2025-01-01T00:00:00+00:00".into(),
        }
        .to_frame();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "new-message");
        assert_eq!(value["data"]["from"], "alice");
        assert_eq!(value["data"]["room"], "alice-bob");
    }

    #[test]
    fn test_user_left_uses_camel_case_fields() {
        let frame = ServerEvent::UserLeft {
            user_id: "bob".into(),
            room_id: "alice-bob".into(),
        }
        .to_frame();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "user-left");
        assert_eq!(value["data"]["userId"], "bob");
        assert_eq!(value["data"]["roomId"], "alice-bob");
    }
}
