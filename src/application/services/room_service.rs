//! Room Coordinator Service
//!
//! Resolves and maintains two-party rooms: deterministic pair resolution,
//! membership queries for reconnect, membership removal, and room detail
//! reads.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ChatMessage, MemberRemoval, Room, RoomRepository};
use crate::shared::error::AppError;

/// Room coordinator trait
#[async_trait]
pub trait RoomService: Send + Sync {
    /// Resolve the room for a pair of users, creating or repairing it.
    ///
    /// Order-independent and idempotent: both parties calling concurrently
    /// end up with the same single record holding both members.
    async fn resolve_room(&self, user_a: &str, user_b: &str) -> Result<Room, RoomError>;

    /// List the ids of all rooms a user belongs to (rejoin-on-reconnect).
    async fn list_rooms(&self, user_id: &str) -> Result<Vec<String>, RoomError>;

    /// Remove a user from the room's membership.
    ///
    /// The record is deleted once membership reaches zero; a single
    /// remaining member keeps a one-sided record with its history.
    async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<MemberRemoval, RoomError>;

    /// Fetch the room record including its message log.
    ///
    /// The requester must be a member of the room.
    async fn room_details(
        &self,
        room_id: &str,
        requester_id: &str,
    ) -> Result<RoomDetailsDto, RoomError>;
}

/// Message data transfer object
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: String,
}

impl From<ChatMessage> for MessageDto {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id.to_string(),
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            timestamp: message.created_at.to_rfc3339(),
        }
    }
}

/// Room record including its message log
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetailsDto {
    pub room_id: String,
    pub member_ids: Vec<String>,
    pub created_at: String,
    pub messages: Vec<MessageDto>,
}

/// Room coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("A room needs two distinct users")]
    SameUser,

    #[error("Room not found")]
    NotFound,

    #[error("Not a member of this room")]
    NotAMember,

    #[error("Store error: {0}")]
    Store(String),
}

impl RoomError {
    fn from_store(err: AppError) -> Self {
        match err {
            AppError::NotFound(_) => RoomError::NotFound,
            e => RoomError::Store(e.to_string()),
        }
    }
}

/// RoomService implementation
pub struct RoomServiceImpl<R>
where
    R: RoomRepository,
{
    room_repo: Arc<R>,
}

impl<R> RoomServiceImpl<R>
where
    R: RoomRepository,
{
    pub fn new(room_repo: Arc<R>) -> Self {
        Self { room_repo }
    }
}

#[async_trait]
impl<R> RoomService for RoomServiceImpl<R>
where
    R: RoomRepository + 'static,
{
    async fn resolve_room(&self, user_a: &str, user_b: &str) -> Result<Room, RoomError> {
        if user_a == user_b {
            return Err(RoomError::SameUser);
        }

        let room_id = Room::canonical_id(user_a, user_b);
        let members = Room::canonical_members(user_a, user_b);

        let room = self
            .room_repo
            .create_or_update(&room_id, &members)
            .await
            .map_err(RoomError::from_store)?;

        tracing::debug!(room_id = %room.room_id, "Room resolved");
        Ok(room)
    }

    async fn list_rooms(&self, user_id: &str) -> Result<Vec<String>, RoomError> {
        let rooms = self
            .room_repo
            .find_by_member(user_id)
            .await
            .map_err(RoomError::from_store)?;

        Ok(rooms.into_iter().map(|r| r.room_id).collect())
    }

    async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<MemberRemoval, RoomError> {
        let removal = self
            .room_repo
            .remove_member(room_id, user_id)
            .await
            .map_err(RoomError::from_store)?
            .ok_or(RoomError::NotFound)?;

        match &removal {
            MemberRemoval::RoomDeleted => {
                tracing::info!(room_id = %room_id, "Room deleted after last member left");
            }
            MemberRemoval::Departed { remaining } => {
                tracing::debug!(
                    room_id = %room_id,
                    remaining = remaining.len(),
                    "Member left room"
                );
            }
        }

        Ok(removal)
    }

    async fn room_details(
        &self,
        room_id: &str,
        requester_id: &str,
    ) -> Result<RoomDetailsDto, RoomError> {
        let room = self
            .room_repo
            .find_by_id(room_id)
            .await
            .map_err(RoomError::from_store)?
            .ok_or(RoomError::NotFound)?;

        if !room.is_member(requester_id) {
            return Err(RoomError::NotAMember);
        }

        let messages = self
            .room_repo
            .find_messages(room_id)
            .await
            .map_err(RoomError::from_store)?;

        Ok(RoomDetailsDto {
            room_id: room.room_id,
            member_ids: room.member_ids,
            created_at: room.created_at.to_rfc3339(),
            messages: messages.into_iter().map(MessageDto::from).collect(),
        })
    }
}
