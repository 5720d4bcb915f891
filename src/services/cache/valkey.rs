//! Valkey backend for the durable permission tier.
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::services::cache::client::{CacheClient, CacheError, CacheResult};

/// Single-primary Valkey connection (read-your-writes for the durable tier).
#[derive(Clone)]
pub struct ValkeyClient {
    manager: ConnectionManager,
}

impl std::fmt::Debug for ValkeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyClient").finish_non_exhaustive()
    }
}

fn command_error(err: redis::RedisError) -> CacheError {
    CacheError::BackendCommand(err.to_string())
}

impl ValkeyClient {
    /// Connects and pings once, so a bad `VALKEY_URL` fails cold start.
    pub async fn new(url: &str) -> Result<Self, CacheError> {
        let connect = |e: redis::RedisError| CacheError::BackendConnection(e.to_string());

        let client = redis::Client::open(url).map_err(connect)?;
        let mut manager = client.get_connection_manager().await.map_err(connect)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(connect)?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheClient for ValkeyClient {
    fn backend_name(&self) -> &'static str {
        "valkey"
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(command_error)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        // EX takes whole seconds, minimum 1
        let seconds = ttl.as_secs().max(1);
        conn.set_ex(key, value, seconds).await.map_err(command_error)
    }
}
