//! Domain Entities
//!
//! Core entities of the chat relay and their repository contracts.

pub mod identity;
pub mod message;
pub mod room;

pub use identity::{Role, UserIdentity};
pub use message::ChatMessage;
pub use room::{MemberRemoval, Room, RoomRepository};

#[cfg(test)]
pub use room::MockRoomRepository;
