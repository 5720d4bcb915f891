use async_trait::async_trait;
use std::time::Duration;

use crate::services::cache::CacheClient;
use crate::services::permissions::store::{
    CachedPermission, PermissionRecord, PermissionStore, StoreError,
};

/// Durable permission tier on top of a `CacheClient` (Valkey in production).
///
/// Records are JSON `{PK, SK, permissions, expiration}` under `<table>:<subject>`.
/// The backend TTL (`retention`) is housekeeping only; freshness comes from `expiration`.
#[derive(Clone)]
pub struct ValkeyPermissionStore<C: CacheClient> {
    cache: C,
    // Namespace, one per deployment stage
    table: String,
    retention: Duration,
}

impl<C: CacheClient> ValkeyPermissionStore<C> {
    pub fn new(cache: C, table: impl Into<String>, retention: Duration) -> Self {
        Self {
            cache,
            table: table.into(),
            retention,
        }
    }

    pub fn key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.table, subject_id)
    }

    pub fn backend_name(&self) -> &'static str {
        self.cache.backend_name()
    }
}

#[async_trait]
impl<C: CacheClient> PermissionStore for ValkeyPermissionStore<C> {
    async fn get(&self, subject_id: &str) -> Result<Option<CachedPermission>, StoreError> {
        let raw = self
            .cache
            .get_string(&self.key(subject_id))
            .await
            .map_err(|source| StoreError::Read {
                subject: subject_id.to_string(),
                source,
            })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let record: PermissionRecord =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                subject: subject_id.to_string(),
                reason: e.to_string(),
            })?;

        record.into_entry().map(Some)
    }

    async fn put(&self, entry: &CachedPermission) -> Result<(), StoreError> {
        let record = PermissionRecord::from_entry(entry);
        let raw = serde_json::to_string(&record).map_err(|e| StoreError::Corrupt {
            subject: entry.subject_id.clone(),
            reason: e.to_string(),
        })?;

        self.cache
            .set_with_ttl(&self.key(&entry.subject_id), &raw, self.retention)
            .await
            .map_err(|source| StoreError::Write {
                subject: entry.subject_id.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCacheClient;
    use chrono::{Duration as ChronoDuration, Utc};

    fn store() -> ValkeyPermissionStore<MemoryCacheClient> {
        ValkeyPermissionStore::new(
            MemoryCacheClient::new(),
            "test-auth-cache",
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn written_record_reads_back_before_expiration() {
        let store = store();
        let entry = CachedPermission {
            subject_id: "auth0|abc".to_string(),
            permissions: vec!["read:items".to_string(), "write:items".to_string()],
            expiration: Utc::now() + ChronoDuration::minutes(15),
        };
        store.put(&entry).await.unwrap();

        let read = store.get("auth0|abc").await.unwrap().unwrap();
        assert_eq!(read.permissions, entry.permissions);
        assert_eq!(read.subject_id, "auth0|abc");
        // 100ns precision on the wire
        let drift = (read.expiration - entry.expiration).num_nanoseconds().unwrap();
        assert!(drift.abs() < 100);
        assert!(read.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn stale_records_are_returned_as_is() {
        let store = store();
        let entry = CachedPermission {
            subject_id: "auth0|old".to_string(),
            permissions: vec!["read:items".to_string()],
            expiration: Utc::now() - ChronoDuration::minutes(1),
        };
        store.put(&entry).await.unwrap();

        let read = store.get("auth0|old").await.unwrap().unwrap();
        assert!(!read.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn absent_record_is_none() {
        assert!(store().get("auth0|nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_uses_subject_as_both_keys() {
        let cache = MemoryCacheClient::new();
        let store = ValkeyPermissionStore::new(cache.clone(), "tbl", Duration::from_secs(60));
        let entry = CachedPermission {
            subject_id: "auth0|k".to_string(),
            permissions: vec!["a".to_string()],
            expiration: Utc::now(),
        };
        store.put(&entry).await.unwrap();

        let raw = cache.get_string("tbl:auth0|k").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["PK"], "auth0|k");
        assert_eq!(json["SK"], "auth0|k");
        assert_eq!(json["permissions"], serde_json::json!(["a"]));
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let cache = MemoryCacheClient::new();
        let store = ValkeyPermissionStore::new(cache.clone(), "tbl", Duration::from_secs(60));
        cache
            .set_with_ttl("tbl:auth0|x", "not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            store.get("auth0|x").await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
