//! Durable permission tier: record shape and the store seam.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::cache::CacheError;

/// Fixed-width UTC timestamp used in durable records, e.g. `2024-01-02T03:04:05.0000000Z`.
const EXPIRATION_PREFIX_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const EXPIRATION_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Permissions resolved for one subject, valid until `expiration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPermission {
    pub subject_id: String,
    pub permissions: Vec<String>,
    pub expiration: DateTime<Utc>,
}

impl CachedPermission {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to retrieve cache value with id {subject}: {source}")]
    Read {
        subject: String,
        #[source]
        source: CacheError,
    },
    #[error("unable to store cache value with id {subject}: {source}")]
    Write {
        subject: String,
        #[source]
        source: CacheError,
    },
    #[error("unable to parse cache record for {subject}: {reason}")]
    Corrupt { subject: String, reason: String },
}

/// Durable, strongly consistent tier keyed by subject id.
///
/// `get` returns whatever is stored, fresh or stale: the resolver validates freshness.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get(&self, subject_id: &str) -> Result<Option<CachedPermission>, StoreError>;

    // Replaces the whole record (no merge). Last write wins.
    async fn put(&self, entry: &CachedPermission) -> Result<(), StoreError>;
}

/// Wire shape of a durable record. Subject id doubles as partition and sort key.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PermissionRecord {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    pub permissions: Vec<String>,
    pub expiration: String,
}

impl PermissionRecord {
    pub fn from_entry(entry: &CachedPermission) -> Self {
        Self {
            pk: entry.subject_id.clone(),
            sk: entry.subject_id.clone(),
            permissions: entry.permissions.clone(),
            expiration: format_expiration(entry.expiration),
        }
    }

    pub fn into_entry(self) -> Result<CachedPermission, StoreError> {
        let expiration = parse_expiration(&self.expiration).ok_or_else(|| StoreError::Corrupt {
            subject: self.pk.clone(),
            reason: format!("invalid expiration '{}'", self.expiration),
        })?;

        Ok(CachedPermission {
            subject_id: self.pk,
            permissions: self.permissions,
            expiration,
        })
    }
}

pub fn format_expiration(at: DateTime<Utc>) -> String {
    // 7 fractional digits (100ns ticks)
    let ticks = at.timestamp_subsec_nanos() / 100;
    format!("{}.{:07}Z", at.format(EXPIRATION_PREFIX_FORMAT), ticks)
}

pub fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, EXPIRATION_PARSE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
