//! Configuration Management
//!
//! Settings loading from files and environment variables.

mod settings;

pub use settings::{
    CorsSettings, DatabaseSettings, JwtSettings, RedisSettings, ServerSettings, Settings,
    WebSocketSettings, MIN_JWT_SECRET_LENGTH,
};
