use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::services::cache::client::{CacheClient, CacheError, CacheResult};

/// In-process cache backend.
///
/// Used when no Valkey URL is configured (local runs) and by tests.
/// Entries past their TTL are dropped on read.
#[derive(Clone, Debug, Default)]
pub struct MemoryCacheClient {
    inner: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::BackendCommand("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut map = self.lock()?;
        match map.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let deadline = Instant::now() + ttl;
        self.lock()?
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }
}
