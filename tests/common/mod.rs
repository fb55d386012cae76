//! Common Test Utilities
//!
//! Shared fakes for exercising the chat core without Postgres or Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use chat_relay::domain::{ChatMessage, MemberRemoval, Room, RoomRepository};
use chat_relay::shared::error::AppError;

/// In-memory room directory mirroring the Postgres implementation's
/// semantics: idempotent create-or-repair, append-only log with
/// store-assigned ids and timestamps, delete-on-empty membership.
#[derive(Default)]
pub struct InMemoryRoomRepository {
    rooms: Mutex<HashMap<String, Room>>,
    messages: Mutex<Vec<ChatMessage>>,
    next_id: AtomicI64,
    /// When set, appends fail as if the store were unreachable.
    pub fail_appends: AtomicBool,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn set_append_failure(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn create_or_update(
        &self,
        room_id: &str,
        member_ids: &[String],
    ) -> Result<Room, AppError> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .entry(room_id.to_string())
            .and_modify(|room| room.member_ids = member_ids.to_vec())
            .or_insert_with(|| Room {
                room_id: room_id.to_string(),
                member_ids: member_ids.to_vec(),
                created_at: Utc::now(),
            });
        Ok(room.clone())
    }

    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError> {
        Ok(self.rooms.lock().get(room_id).cloned())
    }

    async fn find_by_member(&self, user_id: &str) -> Result<Vec<Room>, AppError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .lock()
            .values()
            .filter(|room| room.is_member(user_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(rooms)
    }

    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(AppError::Internal("store unavailable".into()));
        }
        if !self.rooms.lock().contains_key(room_id) {
            return Err(AppError::NotFound(format!("Room {} not found", room_id)));
        }

        let message = ChatMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().push(message.clone());
        Ok(message)
    }

    async fn find_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let mut messages: Vec<ChatMessage> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberRemoval>, AppError> {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(None);
        };

        room.member_ids.retain(|id| id != user_id);
        let remaining = room.member_ids.clone();

        if remaining.is_empty() {
            rooms.remove(room_id);
            self.messages.lock().retain(|m| m.room_id != room_id);
            return Ok(Some(MemberRemoval::RoomDeleted));
        }

        Ok(Some(MemberRemoval::Departed { remaining }))
    }
}
