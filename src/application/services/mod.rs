//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **IdentityService**: bearer token verification against the external
//!   identity service's signing key
//! - **RoomService**: two-party room resolution, membership, and detail reads
//! - **RelayService**: message validation, persistence, and fan-out

pub mod identity_service;
pub mod relay_service;
pub mod room_service;

// Re-export identity service types
pub use identity_service::{Claims, IdentityError, IdentityService, JwtIdentityVerifier};

// Re-export room service types
pub use room_service::{MessageDto, RoomDetailsDto, RoomError, RoomService, RoomServiceImpl};

// Re-export relay service types
pub use relay_service::{MessageBroadcaster, RelayError, RelayService, RelayServiceImpl};
