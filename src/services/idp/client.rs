//! HTTP client for the identity provider's management API.
//!
//! Two calls are made:
//! - `POST {issuer}oauth/token` (client-credentials grant for the service token)
//! - `GET {issuer}api/v2/users/{subject}/permissions`

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::config::ServiceConfig;

#[derive(Debug, Error)]
pub enum IdpError {
    #[error("invalid identity provider url: {0}")]
    InvalidUrl(String),
    #[error("identity provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("error retrieving {what}: {status}")]
    Status {
        what: &'static str,
        status: StatusCode,
    },
    #[error("error parsing {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

/// Response of the client-credentials exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'a str,
}

/// One entry of the permissions listing; the remaining fields are ignored.
#[derive(Debug, Deserialize)]
struct UserPermission {
    permission_name: String,
}

/// Obtains the service's own access token.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn client_credentials(&self) -> Result<TokenGrant, IdpError>;
}

/// Lists the permissions granted to a user-type subject.
#[async_trait]
pub trait PermissionsApi: Send + Sync {
    async fn user_permissions(
        &self,
        subject_id: &str,
        access_token: &str,
    ) -> Result<Vec<String>, IdpError>;
}

#[derive(Clone)]
pub struct IdpClient {
    http: reqwest::Client,
    base: Url,
    client_id: String,
    client_secret: String,
    client_audience: String,
    grant_type: String,
}

impl std::fmt::Debug for IdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the client secret
        f.debug_struct("IdpClient")
            .field("base", &self.base.as_str())
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl IdpClient {
    pub fn new(http: reqwest::Client, config: &ServiceConfig) -> Result<Self, IdpError> {
        // Relative joins need a trailing slash on the issuer
        let issuer = if config.issuer.ends_with('/') {
            config.issuer.clone()
        } else {
            format!("{}/", config.issuer)
        };
        let base = Url::parse(&issuer).map_err(|e| IdpError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            http,
            base,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client_audience: config.client_audience.clone(),
            grant_type: config.grant_type.clone(),
        })
    }

    fn token_url(&self) -> Result<Url, IdpError> {
        self.base
            .join("oauth/token")
            .map_err(|e| IdpError::InvalidUrl(e.to_string()))
    }

    fn permissions_url(&self, subject_id: &str) -> Result<Url, IdpError> {
        let mut url = self
            .base
            .join("api/v2/users/")
            .map_err(|e| IdpError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| IdpError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push(subject_id)
            .push("permissions");
        Ok(url)
    }
}

#[async_trait]
impl TokenEndpoint for IdpClient {
    async fn client_credentials(&self) -> Result<TokenGrant, IdpError> {
        let body = TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            audience: &self.client_audience,
            grant_type: &self.grant_type,
        };

        let resp = self.http.post(self.token_url()?).json(&body).send().await?;

        if resp.status() != StatusCode::OK {
            error!(status = %resp.status(), "token endpoint rejected client credentials");
            return Err(IdpError::Status {
                what: "authorizer token",
                status: resp.status(),
            });
        }

        resp.json::<TokenGrant>()
            .await
            .map_err(|e| IdpError::Decode {
                what: "authorizer token",
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PermissionsApi for IdpClient {
    async fn user_permissions(
        &self,
        subject_id: &str,
        access_token: &str,
    ) -> Result<Vec<String>, IdpError> {
        let resp = self
            .http
            .get(self.permissions_url(subject_id)?)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(IdpError::Status {
                what: "user permissions",
                status: resp.status(),
            });
        }

        let records: Vec<UserPermission> = resp.json().await.map_err(|e| IdpError::Decode {
            what: "user permissions",
            reason: e.to_string(),
        })?;

        debug!(subject = %subject_id, count = records.len(), "fetched user permissions");

        Ok(records.into_iter().map(|p| p.permission_name).collect())
    }
}
