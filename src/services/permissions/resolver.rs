//! Cache-aside permission resolution.
//!
//! App-type subjects carry their permissions in the `scope` claim. User-type
//! subjects go ephemeral tier -> durable tier -> permissions API, and a
//! successful fetch replaces both tiers.
//!
//! The fetch runs as its own task which also owns the cache write. After
//! dispatching it the resolver looks at the cache once more: if a concurrent
//! resolution already landed a fresh entry, that entry is served and the task
//! is left to finish on its own (its write still lands). Otherwise the
//! resolver waits on the task for either its permissions or its error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::services::auth::{SubjectKind, VerifiedToken};
use crate::services::idp::{CredentialError, CredentialProvider, IdpError, PermissionsApi};
use crate::services::permissions::ephemeral::EphemeralCache;
use crate::services::permissions::store::{CachedPermission, PermissionStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Upstream(#[from] IdpError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("permission fetch task failed: {0}")]
    Task(String),
}

impl ResolveError {
    /// The underlying error text is surfaced in the Deny context.
    pub fn deny_message(&self) -> String {
        self.to_string()
    }
}

/// Writes a fetched permission set to both tiers.
#[derive(Clone)]
struct CacheWriter {
    ephemeral: EphemeralCache,
    durable: Arc<dyn PermissionStore>,
    ttl: chrono::Duration,
}

impl CacheWriter {
    async fn store(&self, subject_id: &str, permissions: &[String]) {
        let entry = CachedPermission {
            subject_id: subject_id.to_string(),
            permissions: permissions.to_vec(),
            expiration: Utc::now() + self.ttl,
        };

        self.ephemeral.put(entry.clone());

        // Best effort: the cache is not authoritative for the current decision
        if let Err(err) = self.durable.put(&entry).await {
            warn!(subject = %subject_id, error = %err, "durable permission write failed");
        }
    }
}

pub struct PermissionResolver {
    writer: CacheWriter,
    upstream: Arc<dyn PermissionsApi>,
    credentials: Arc<CredentialProvider>,
}

impl PermissionResolver {
    pub fn new(
        ephemeral: EphemeralCache,
        durable: Arc<dyn PermissionStore>,
        upstream: Arc<dyn PermissionsApi>,
        credentials: Arc<CredentialProvider>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));
        Self {
            writer: CacheWriter {
                ephemeral,
                durable,
                ttl,
            },
            upstream,
            credentials,
        }
    }

    pub async fn resolve(&self, token: &VerifiedToken) -> Result<Vec<String>, ResolveError> {
        match token.kind {
            SubjectKind::App => Ok(split_scope(&token.scope)),
            SubjectKind::User => self.resolve_user(&token.subject).await,
        }
    }

    pub async fn resolve_user(&self, subject_id: &str) -> Result<Vec<String>, ResolveError> {
        if let Some(hit) = self.fresh_entry(subject_id).await? {
            debug!(subject = %subject_id, "permission cache hit");
            return Ok(hit.permissions);
        }

        let access_token = self.credentials.access_token().await?;
        let fetch = self.spawn_fetch(subject_id.to_string(), access_token);

        // A concurrent resolution may have landed an entry in the meantime.
        // Returning early, even with an error, leaves the fetch running.
        if let Some(hit) = self.fresh_entry(subject_id).await? {
            info!(
                subject = %subject_id,
                "serving concurrently cached permissions, fetch continues in background"
            );
            return Ok(hit.permissions);
        }

        match fetch.await {
            Ok(result) => Ok(result?),
            Err(join_err) => Err(ResolveError::Task(join_err.to_string())),
        }
    }

    /// Ephemeral tier if fresh, otherwise the durable record as-is; then the
    /// freshness filter.
    async fn fresh_entry(&self, subject_id: &str) -> Result<Option<CachedPermission>, StoreError> {
        let entry = self.lookup(subject_id).await?;
        Ok(entry.filter(|entry| entry.is_fresh(Utc::now())))
    }

    async fn lookup(&self, subject_id: &str) -> Result<Option<CachedPermission>, StoreError> {
        if let Some(entry) = self.writer.ephemeral.get(subject_id)
            && entry.is_fresh(Utc::now())
        {
            return Ok(Some(entry));
        }

        self.writer.durable.get(subject_id).await.inspect_err(|err| {
            warn!(subject = %subject_id, error = %err, "durable permission read failed");
        })
    }

    fn spawn_fetch(
        &self,
        subject_id: String,
        access_token: String,
    ) -> JoinHandle<Result<Vec<String>, IdpError>> {
        let upstream = Arc::clone(&self.upstream);
        let writer = self.writer.clone();

        tokio::spawn(
            async move {
                let permissions = upstream
                    .user_permissions(&subject_id, &access_token)
                    .await?;
                writer.store(&subject_id, &permissions).await;
                Ok(permissions)
            }
            .in_current_span(),
        )
    }
}

pub fn split_scope(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}
