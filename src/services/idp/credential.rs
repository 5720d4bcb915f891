//! Service credential used to call the permissions API.
//!
//! Obtained once at cold start (failure is fatal to startup) and refreshed
//! before it expires when the token endpoint reports a lifetime. After a
//! failed refresh the current token keeps being served, without retrying,
//! for `REFRESH_RETRY_BACKOFF` as long as it has not expired.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::services::idp::client::{IdpError, TokenEndpoint};

const REFRESH_RETRY_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Exchange(#[from] IdpError),
}

#[derive(Clone)]
pub struct ServiceCredential {
    pub access_token: String,
    pub obtained_at: DateTime<Utc>,
    // None when the token endpoint does not report `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the token
        f.debug_struct("ServiceCredential")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl ServiceCredential {
    fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let Some(at) = self.expires_at else {
            return false;
        };
        // An unrepresentable skew means "always refresh"
        TimeDelta::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
            .is_none_or(|deadline| deadline >= at)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct Slot {
    credential: Option<ServiceCredential>,
    last_failure: Option<Instant>,
}

impl Slot {
    /// Token that can be handed out without calling the token endpoint.
    fn servable(&self, skew: Duration) -> Option<String> {
        let now = Utc::now();
        let current = self.credential.as_ref()?;
        if !current.needs_refresh(now, skew) {
            return Some(current.access_token.clone());
        }

        let backing_off = self
            .last_failure
            .is_some_and(|at| at.elapsed() < REFRESH_RETRY_BACKOFF);
        (backing_off && !current.is_expired(now)).then(|| current.access_token.clone())
    }
}

pub struct CredentialProvider {
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_skew: Duration,
    slot: RwLock<Slot>,
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("refresh_skew", &self.refresh_skew)
            .finish_non_exhaustive()
    }
}

impl CredentialProvider {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, refresh_skew: Duration) -> Self {
        Self {
            endpoint,
            refresh_skew,
            slot: RwLock::new(Slot::default()),
        }
    }

    /// Cold-start exchange. Callers treat an error as fatal.
    pub async fn initialize(&self) -> Result<ServiceCredential, CredentialError> {
        let credential = self.exchange().await?;
        let mut slot = self.slot.write().await;
        slot.credential = Some(credential.clone());
        slot.last_failure = None;
        Ok(credential)
    }

    /// Current access token, refreshed when it is within the skew of expiring.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.slot.read().await.servable(self.refresh_skew) {
            return Ok(token);
        }

        let mut slot = self.slot.write().await;

        // Another request may have refreshed, or failed to, while we waited
        if let Some(token) = slot.servable(self.refresh_skew) {
            return Ok(token);
        }

        match self.exchange().await {
            Ok(fresh) => {
                let token = fresh.access_token.clone();
                slot.credential = Some(fresh);
                slot.last_failure = None;
                Ok(token)
            }
            Err(err) => {
                slot.last_failure = Some(Instant::now());
                match slot.credential.as_ref() {
                    Some(current) if !current.is_expired(Utc::now()) => {
                        warn!(error = %err, "service token refresh failed, using current token");
                        Ok(current.access_token.clone())
                    }
                    _ => Err(err),
                }
            }
        }
    }

    async fn exchange(&self) -> Result<ServiceCredential, CredentialError> {
        let grant = self.endpoint.client_credentials().await?;
        let obtained_at = Utc::now();
        let expires_at = grant.expires_in.and_then(|secs| {
            let lifetime = i64::try_from(secs).ok().and_then(TimeDelta::try_seconds);
            lifetime.and_then(|lifetime| obtained_at.checked_add_signed(lifetime))
        });
        if expires_at.is_none() && grant.expires_in.is_some() {
            warn!(expires_in = ?grant.expires_in, "unrepresentable token lifetime, treating as non-expiring");
        }

        info!(
            ?expires_at,
            token_type = grant.token_type.as_deref().unwrap_or("-"),
            scope = grant.scope.as_deref().unwrap_or("-"),
            "obtained service token"
        );

        Ok(ServiceCredential {
            access_token: grant.access_token,
            obtained_at,
            expires_at,
        })
    }
}
