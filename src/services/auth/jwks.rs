//! Live verification key set (JWKS).
//!
//! - One fetch at cold start, then a background refresher keeps it warm.
//! - An unknown `kid` triggers a single rate-limited refresh (key rotation).
//! - The request path only reads.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("invalid jwks uri: {0}")]
    InvalidUri(String),
    #[error("jwks fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("jwks endpoint returned status {0}")]
    Status(StatusCode),
    #[error("invalid jwks format: {0}")]
    Parse(String),
}

#[derive(Clone)]
struct JwksSource {
    http: reqwest::Client,
    uri: Url,
}

#[derive(Clone)]
pub struct JwksStore {
    // None for a fixed key set (never refreshed)
    source: Option<JwksSource>,
    keys: Arc<RwLock<JwkSet>>,
    last_refresh: Arc<Mutex<Option<Instant>>>,
    min_refresh_interval: Duration,
}

impl std::fmt::Debug for JwksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksStore")
            .field("uri", &self.source.as_ref().map(|s| s.uri.as_str()))
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl JwksStore {
    /// Store backed by a JWKS endpoint. Starts empty; call `refresh` to load.
    pub fn remote(
        http: reqwest::Client,
        jwks_uri: &str,
        min_refresh_interval: Duration,
    ) -> Result<Self, JwksError> {
        let uri = Url::parse(jwks_uri).map_err(|e| JwksError::InvalidUri(e.to_string()))?;

        Ok(Self {
            source: Some(JwksSource { http, uri }),
            keys: Arc::new(RwLock::new(JwkSet { keys: Vec::new() })),
            last_refresh: Arc::new(Mutex::new(None)),
            min_refresh_interval,
        })
    }

    /// Store with a fixed key set.
    pub fn from_keys(keys: JwkSet) -> Self {
        Self {
            source: None,
            keys: Arc::new(RwLock::new(keys)),
            last_refresh: Arc::new(Mutex::new(None)),
            min_refresh_interval: Duration::MAX,
        }
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.keys.len()
    }

    pub async fn find(&self, kid: &str) -> Option<Jwk> {
        self.keys.read().await.find(kid).cloned()
    }

    /// Look up `kid`; on a miss, refresh once (rate limited) and look again.
    pub async fn find_or_refresh(&self, kid: &str) -> Option<Jwk> {
        if let Some(jwk) = self.find(kid).await {
            return Some(jwk);
        }

        if self.source.is_none() || !self.refresh_allowed() {
            debug!(kid, "unknown kid, refresh skipped");
            return None;
        }

        info!(kid, "unknown kid, refreshing key set");
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "key set refresh failed");
            return None;
        }

        self.find(kid).await
    }

    /// Fetch the key set and replace the current one. Returns the key count.
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let Some(source) = self.source.as_ref() else {
            return Ok(self.key_count().await);
        };

        self.mark_refresh();

        let resp = source.http.get(source.uri.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(JwksError::Status(resp.status()));
        }

        let jwks: JwkSet = resp
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;
        let count = jwks.keys.len();

        *self.keys.write().await = jwks;

        info!(jwks_uri = %source.uri, key_count = count, "loaded key set");
        Ok(count)
    }

    /// Periodic refresh outside request latency.
    pub fn spawn_refresher(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            // The first tick completes immediately; cold start already loaded the set
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = store.refresh().await {
                    warn!(error = %err, "scheduled key set refresh failed");
                }
            }
        })
    }

    fn refresh_allowed(&self) -> bool {
        let last = self
            .last_refresh
            .lock()
            .map(|guard| *guard)
            .unwrap_or(None);
        match last {
            Some(at) => at.elapsed() >= self.min_refresh_interval,
            None => true,
        }
    }

    fn mark_refresh(&self) {
        if let Ok(mut guard) = self.last_refresh.lock() {
            *guard = Some(Instant::now());
        }
    }
}
