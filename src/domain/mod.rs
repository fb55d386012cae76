//! # Domain Layer
//!
//! Core business types of the chat relay, independent of any framework or
//! infrastructure concern.
//!
//! - **entities**: UserIdentity, Room, ChatMessage
//! - Repository traits define the data access contracts implemented by the
//!   infrastructure layer

pub mod entities;

pub use entities::*;
