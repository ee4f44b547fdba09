//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{
    AsyncCommands, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::warn;

use super::store::{CacheStore, StoreError};

/// [`CacheStore`] over a multiplexed Redis connection.
///
/// The connection manager re-establishes dropped connections on its own;
/// commands issued while it reconnects fail and are reported to the caller.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Open a connection to `url` (`redis://` or `rediss://`).
    ///
    /// `timeout` bounds both connection establishment and each response.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|err| StoreError::Connection(err.to_string()))?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout);
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection
            .get(key)
            .await
            .map_err(|err| command_error("GET", err))?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        // SETEX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        connection
            .set_ex::<_, _, ()>(key, value.as_ref(), seconds)
            .await
            .map_err(|err| command_error("SETEX", err))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut connection = self.connection.clone();
        connection
            .del::<_, u64>(keys)
            .await
            .map_err(|err| command_error("DEL", err))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut connection = self.connection.clone();
        let mut keys: Vec<String> = connection
            .keys(pattern)
            .await
            .map_err(|err| command_error("KEYS", err))?;
        keys.sort();
        Ok(keys)
    }
}

fn command_error(command: &'static str, err: RedisError) -> StoreError {
    if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
        warn!(
            target: "clubhouse::cache::redis",
            command,
            error = %err,
            "redis connection lost, reconnecting"
        );
        return StoreError::Connection(err.to_string());
    }
    StoreError::command(command, err.to_string())
}
