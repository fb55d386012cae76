//! Chat message entity.
//!
//! A single entry in a room's append-only message log. Messages are
//! immutable once appended; there is no edit or delete operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a persisted chat message.
///
/// Maps to the `room_messages` table:
/// - id: BIGSERIAL PRIMARY KEY (append order)
/// - room_id: TEXT NOT NULL REFERENCES rooms(room_id)
/// - sender_id: TEXT NOT NULL
/// - content: TEXT NOT NULL (max 4000 characters)
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
///
/// `created_at` is assigned by the store at insert time; a client-supplied
/// timestamp is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sequence id within the directory (append order)
    pub id: i64,

    /// Room this message belongs to
    pub room_id: String,

    /// Sender user id
    pub sender_id: String,

    /// Message content
    pub content: String,

    /// Timestamp assigned at persistence time
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Maximum accepted content length in characters.
    pub const MAX_CONTENT_LENGTH: usize = 4000;

    /// Get the content length in characters.
    pub fn content_length(&self) -> usize {
        self.content.chars().count()
    }
}
