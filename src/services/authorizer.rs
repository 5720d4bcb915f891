//! Per-request orchestration: bearer -> validation -> permissions -> decision.
//!
//! Nothing here fails the process: every error becomes a Deny.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::services::auth::{JwksStore, TokenValidator, extract_bearer};
use crate::services::permissions::PermissionResolver;
use crate::services::policy::PolicyDecision;

/// Invocation request sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub authorization_token: String,
    pub method_arn: String,
}

pub struct Authorizer {
    keys: JwksStore,
    validator: TokenValidator,
    resolver: Arc<PermissionResolver>,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("keys", &self.keys)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    pub fn new(keys: JwksStore, validator: TokenValidator, resolver: Arc<PermissionResolver>) -> Self {
        Self {
            keys,
            validator,
            resolver,
        }
    }

    pub async fn authorize(&self, request: &AuthorizerRequest) -> PolicyDecision {
        let span = info_span!("authorize", invocation_id = %Uuid::new_v4());
        async {
            let decision = self.decide(request).await;
            info!(effect = ?decision.effect(), principal = %decision.principal_id, "decision");
            decision
        }
        .instrument(span)
        .await
    }

    async fn decide(&self, request: &AuthorizerRequest) -> PolicyDecision {
        let resource = request.method_arn.as_str();

        let token = match extract_bearer(&request.kind, &request.authorization_token) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "error retrieving token from request");
                return PolicyDecision::deny("", resource, err.deny_message());
            }
        };

        let verified = match self.validator.validate(token, &self.keys).await {
            Ok(verified) => verified,
            Err(err) => {
                warn!(error = %err, "token rejected");
                return PolicyDecision::deny(err.principal(), resource, err.deny_message());
            }
        };

        info!(subject = %verified.subject, kind = verified.kind.as_str(), "received token");

        match self.resolver.resolve(&verified).await {
            Ok(permissions) => PolicyDecision::allow(&verified.subject, resource, &permissions),
            Err(err) => {
                warn!(subject = %verified.subject, error = %err, "permission resolution failed");
                PolicyDecision::deny(&verified.subject, resource, err.deny_message())
            }
        }
    }
}
