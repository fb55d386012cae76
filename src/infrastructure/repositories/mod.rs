//! Repository Implementations
//!
//! PostgreSQL-backed implementations of the domain repository traits.

mod room_repository;

pub use room_repository::PgRoomRepository;
