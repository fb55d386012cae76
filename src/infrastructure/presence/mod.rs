//! Presence Store
//!
//! Shared mapping from user id to the connection locator currently serving
//! that user. The store must be visible to every server process so presence
//! stays correct under horizontal scale-out; Redis is the target backend.
//!
//! Writes are idempotent last-writer-wins per user key: a reconnect simply
//! overwrites the previous locator. Absence on read is a normal outcome
//! meaning "not currently reachable", never an error.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, instrument};

use crate::config::RedisSettings;
use crate::shared::error::AppError;

/// Presence key prefix (e.g., "presence:user_id")
pub const PRESENCE_KEY: &str = "presence:";

/// Generates the presence key for a user
#[inline]
pub fn presence_key(user_id: impl std::fmt::Display) -> String {
    format!("{}{}", PRESENCE_KEY, user_id)
}

/// Store of live user -> connection locator mappings.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record `locator` as the connection serving `user_id`.
    ///
    /// Last writer wins: an existing entry for the user is overwritten.
    async fn register(&self, user_id: &str, locator: &str) -> Result<(), AppError>;

    /// Look up the connection locator currently serving `user_id`.
    ///
    /// `Ok(None)` means the user is not reachable anywhere right now.
    async fn locate(&self, user_id: &str) -> Result<Option<String>, AppError>;

    /// Remove the entry for `user_id`, but only if it still points at
    /// `locator`.
    ///
    /// The guard keeps a slow disconnect from erasing the entry a newer
    /// connection for the same user has already written. Returns whether an
    /// entry was removed.
    async fn clear(&self, user_id: &str, locator: &str) -> Result<bool, AppError>;
}

/// Redis-backed presence store.
///
/// Uses a `ConnectionManager` for pooling and automatic reconnection, the
/// same way the cache layer does.
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
}

impl RedisPresenceStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    #[instrument(skip(self), level = "debug")]
    async fn register(&self, user_id: &str, locator: &str) -> Result<(), AppError> {
        let key = presence_key(user_id);
        let mut conn = self.conn.clone();

        let _: () = conn.set(&key, locator).await?;
        debug!(key = %key, locator = %locator, "Presence registered");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn locate(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let key = presence_key(user_id);
        let mut conn = self.conn.clone();

        let locator: Option<String> = conn.get(&key).await?;
        debug!(key = %key, present = locator.is_some(), "Presence lookup");

        Ok(locator)
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear(&self, user_id: &str, locator: &str) -> Result<bool, AppError> {
        let key = presence_key(user_id);
        let mut conn = self.conn.clone();

        // GET-then-DEL is not atomic; the window where a reconnect lands
        // between the two calls loses at most its own entry, and the next
        // last-writer-wins register repairs it.
        let current: Option<String> = conn.get(&key).await?;
        if current.as_deref() != Some(locator) {
            debug!(key = %key, "Presence entry already replaced, leaving it");
            return Ok(false);
        }

        let deleted: u64 = conn.del(&key).await?;
        debug!(key = %key, deleted = deleted > 0, "Presence cleared");

        Ok(deleted > 0)
    }
}

impl std::fmt::Debug for RedisPresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPresenceStore").finish_non_exhaustive()
    }
}

/// In-process presence store.
///
/// Correct only while a single server instance is running; kept as a
/// fallback for local development and tests. The shared Redis store is the
/// deployment target.
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    entries: DashMap<String, String>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn register(&self, user_id: &str, locator: &str) -> Result<(), AppError> {
        self.entries.insert(user_id.to_string(), locator.to_string());
        Ok(())
    }

    async fn locate(&self, user_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.get(user_id).map(|e| e.value().clone()))
    }

    async fn clear(&self, user_id: &str, locator: &str) -> Result<bool, AppError> {
        Ok(self
            .entries
            .remove_if(user_id, |_, current| current == locator)
            .is_some())
    }
}

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = redis::Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}
