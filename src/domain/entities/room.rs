//! Room entity and repository trait.
//!
//! A room is a durable two-party conversation channel. Its identifier is a
//! deterministic, order-independent function of the two member identities,
//! so both parties always resolve to the same record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::ChatMessage;
use crate::shared::error::AppError;

/// Represents a two-party chat room.
///
/// Maps to the `rooms` table:
/// - room_id: TEXT PRIMARY KEY (canonical pair id)
/// - member_ids: TEXT[] NOT NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Canonical room identifier
    pub room_id: String,

    /// Current member user ids (two while active, one when a member left)
    pub member_ids: Vec<String>,

    /// Timestamp when the room was created
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Compute the canonical identifier for a pair of user ids.
    ///
    /// The id is order-independent: `canonical_id(a, b) == canonical_id(b, a)`.
    pub fn canonical_id(user_a: &str, user_b: &str) -> String {
        let mut pair = [user_a, user_b];
        pair.sort_unstable();
        pair.join("-")
    }

    /// The canonical member list for a pair, matching the id ordering.
    pub fn canonical_members(user_a: &str, user_b: &str) -> Vec<String> {
        let mut pair = [user_a.to_string(), user_b.to_string()];
        pair.sort_unstable();
        pair.to_vec()
    }

    /// Check whether a user is currently a member of this room.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == user_id)
    }

    /// A room is active while both parties are members.
    pub fn is_active(&self) -> bool {
        self.member_ids.len() == 2
    }
}

/// Outcome of removing a member from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRemoval {
    /// The member left; the listed members remain.
    Departed { remaining: Vec<String> },
    /// The member was the last one; the room record was deleted.
    RoomDeleted,
}

/// Repository trait for room directory access.
///
/// Every operation is a single atomic store operation; no call holds state
/// across another. Implementations must make `create_or_update` safe under
/// concurrent invocation for the same room id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Create the room if absent, otherwise repair its member list.
    ///
    /// Idempotent on the room id: concurrent calls for the same pair
    /// collapse to one record instead of erroring on the unique key.
    async fn create_or_update(
        &self,
        room_id: &str,
        member_ids: &[String],
    ) -> Result<Room, AppError>;

    /// Find a room by its canonical id.
    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError>;

    /// Find all rooms a user belongs to (used to restore subscriptions on
    /// reconnect).
    async fn find_by_member(&self, user_id: &str) -> Result<Vec<Room>, AppError>;

    /// Append a message to the room's log.
    ///
    /// The timestamp is assigned by the store. Returns the persisted
    /// message, or `NotFound` if the room does not exist.
    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, AppError>;

    /// Fetch the room's message log in append order.
    async fn find_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, AppError>;

    /// Remove a member from the room; delete the record once empty.
    ///
    /// Returns `None` if the room does not exist.
    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberRemoval>, AppError>;
}
