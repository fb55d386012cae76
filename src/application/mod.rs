//! Application Layer
//!
//! Services implementing the chat core's business logic on top of the
//! domain contracts.

pub mod services;
