//! Message Relay Service
//!
//! Validates, persists, and broadcasts chat messages. Persistence always
//! precedes broadcast: a message that failed to append is never delivered,
//! so the order any subscriber observes is the append order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ChatMessage, RoomRepository};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

use super::room_service::MessageDto;

/// Fan-out seam implemented by the connection gateway.
///
/// Delivery is best-effort to the connections currently subscribed to the
/// room; there is no acknowledgment or retry. A dropped recipient recovers
/// the message from the room's persisted log.
pub trait MessageBroadcaster: Send + Sync {
    /// Deliver a persisted message to every subscribed connection.
    fn broadcast(&self, room_id: &str, message: &MessageDto);
}

/// Message relay trait
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Persist `content` to the room's log and fan it out.
    ///
    /// The caller is responsible for the subscription (authorization)
    /// check; the relay enforces content validity and the
    /// persist-before-broadcast ordering.
    async fn relay(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageDto, RelayError>;
}

/// Message relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("Message content too long")]
    ContentTooLong,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Store error: {0}")]
    Store(String),
}

/// RelayService implementation
pub struct RelayServiceImpl<R, B>
where
    R: RoomRepository,
    B: MessageBroadcaster,
{
    room_repo: Arc<R>,
    broadcaster: Arc<B>,
}

impl<R, B> RelayServiceImpl<R, B>
where
    R: RoomRepository,
    B: MessageBroadcaster,
{
    pub fn new(room_repo: Arc<R>, broadcaster: Arc<B>) -> Self {
        Self {
            room_repo,
            broadcaster,
        }
    }
}

#[async_trait]
impl<R, B> RelayService for RelayServiceImpl<R, B>
where
    R: RoomRepository + 'static,
    B: MessageBroadcaster + 'static,
{
    async fn relay(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageDto, RelayError> {
        if content.trim().is_empty() {
            return Err(RelayError::EmptyContent);
        }
        if content.chars().count() > ChatMessage::MAX_CONTENT_LENGTH {
            return Err(RelayError::ContentTooLong);
        }

        let persisted = self
            .room_repo
            .append_message(room_id, sender_id, content)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => RelayError::RoomNotFound,
                e => RelayError::Store(e.to_string()),
            })?;

        let dto = MessageDto::from(persisted);

        // Only reached after a successful append.
        self.broadcaster.broadcast(room_id, &dto);
        metrics::MESSAGES_RELAYED_TOTAL.inc();

        tracing::debug!(
            room_id = %room_id,
            sender_id = %sender_id,
            message_id = %dto.id,
            "Message relayed"
        );

        Ok(dto)
    }
}
