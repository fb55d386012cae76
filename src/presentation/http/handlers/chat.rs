//! Chat Handlers
//!
//! HTTP surface for room reads outside the live connection.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};

use crate::application::services::{RoomDetailsDto, RoomError, RoomService, RoomServiceImpl};
use crate::infrastructure::repositories::PgRoomRepository;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Get a room record including its message log.
///
/// Returns the same record as the WebSocket `get-room-details` event; the
/// requester must be a member of the room.
pub async fn get_room_details(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetailsDto>, AppError> {
    let room_repo = Arc::new(PgRoomRepository::new(state.db.clone()));
    let room_service = RoomServiceImpl::new(room_repo);

    let details = room_service
        .room_details(&room_id, &auth.identity.id)
        .await
        .map_err(|e| match e {
            RoomError::NotFound => AppError::NotFound("Room not found".into()),
            RoomError::NotAMember => AppError::Forbidden("Not a member of this room".into()),
            e => AppError::Internal(e.to_string()),
        })?;

    Ok(Json(details))
}
