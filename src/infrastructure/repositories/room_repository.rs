//! Room Repository Implementation
//!
//! PostgreSQL implementation of the room directory: idempotent room
//! creation keyed on the canonical pair id, append-only message log, and
//! membership queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{ChatMessage, MemberRemoval, Room, RoomRepository};
use crate::shared::error::AppError;

/// PostgreSQL room repository implementation.
///
/// Every method is a single store round trip (plus the conditional delete
/// after a membership removal); no multi-statement transactions are needed.
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    /// Creates a new PgRoomRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for room queries.
#[derive(Debug, sqlx::FromRow)]
struct RoomRow {
    room_id: String,
    member_ids: Vec<String>,
    created_at: DateTime<Utc>,
}

impl RoomRow {
    fn into_room(self) -> Room {
        Room {
            room_id: self.room_id,
            member_ids: self.member_ids,
            created_at: self.created_at,
        }
    }
}

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: String,
    sender_id: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    /// Create the room if absent, otherwise repair its member list.
    ///
    /// `ON CONFLICT .. DO UPDATE` makes concurrent resolution by both
    /// parties collapse onto the existing record: the duplicate-key attempt
    /// becomes a rewrite of the member list to the same canonical pair,
    /// never an error. A stale one-sided record is repaired the same way.
    async fn create_or_update(
        &self,
        room_id: &str,
        member_ids: &[String],
    ) -> Result<Room, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            INSERT INTO rooms (room_id, member_ids)
            VALUES ($1, $2)
            ON CONFLICT (room_id) DO UPDATE SET member_ids = EXCLUDED.member_ids
            RETURNING room_id, member_ids, created_at
            "#,
        )
        .bind(room_id)
        .bind(member_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_room())
    }

    /// Find a room by its canonical id.
    ///
    /// Returns None if the room does not exist.
    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT room_id, member_ids, created_at
            FROM rooms
            WHERE room_id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_room()))
    }

    /// Find all rooms a user belongs to.
    async fn find_by_member(&self, user_id: &str) -> Result<Vec<Room>, AppError> {
        let rows = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT room_id, member_ids, created_at
            FROM rooms
            WHERE $1 = ANY(member_ids)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_room()).collect())
    }

    /// Append a message to the room's log.
    ///
    /// A single INSERT; the append order is the sequence order and the
    /// timestamp comes from the store, so there is no read-modify-write of
    /// the log.
    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO room_messages (room_id, sender_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, room_id, sender_id, content, created_at
            "#,
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::NotFound(format!("Room {} not found", room_id))
            }
            _ => AppError::from(e),
        })?;

        Ok(row.into_message())
    }

    /// Fetch the room's message log in append order.
    async fn find_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, room_id, sender_id, content, created_at
            FROM room_messages
            WHERE room_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    /// Remove a member; delete the record once the member list is empty.
    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberRemoval>, AppError> {
        let remaining = sqlx::query_scalar::<_, Vec<String>>(
            r#"
            UPDATE rooms
            SET member_ids = array_remove(member_ids, $2)
            WHERE room_id = $1
            RETURNING member_ids
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let remaining = match remaining {
            Some(members) => members,
            None => return Ok(None),
        };

        if remaining.is_empty() {
            // Guarded so a concurrent rejoin between the two statements
            // keeps its freshly repaired room.
            sqlx::query("DELETE FROM rooms WHERE room_id = $1 AND member_ids = '{}'")
                .bind(room_id)
                .execute(&self.pool)
                .await?;

            return Ok(Some(MemberRemoval::RoomDeleted));
        }

        Ok(Some(MemberRemoval::Departed { remaining }))
    }
}
