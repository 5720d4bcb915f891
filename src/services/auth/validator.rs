//! Signature & claims validation of incoming access tokens.
//!
//! Order of checks:
//! 1. resolve the key by `kid`
//! 2. algorithm must be RSA (RS256/RS384/RS512)
//! 3. signature + `exp`/`nbf` (jsonwebtoken)
//! 4. `aud` contains the configured audience
//! 5. `iss` contains the configured issuer
//! 6. non-empty `sub`, then classify user/app
//! 7. non-empty `scope`

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::services::auth::jwks::JwksStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no verification key matches the token")]
    KeyResolutionFailed,
    #[error("token algorithm is missing or not RSA")]
    UnsupportedAlgorithm,
    #[error("token is expired")]
    TokenExpired,
    #[error("token is not valid yet")]
    TokenNotYetValid,
    #[error("token is malformed")]
    TokenMalformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token audience does not include the registered audience")]
    AudienceMismatch,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token has no subject")]
    MissingSubject,
    #[error("token for {subject} has no scope")]
    MissingScope { subject: String },
}

impl TokenError {
    /// Text placed in the Deny context.
    pub fn deny_message(&self) -> &'static str {
        match self {
            Self::KeyResolutionFailed => "Unauthorized: Unable to decode token",
            Self::UnsupportedAlgorithm => "Unauthorized: Token uses invalid signing method",
            Self::TokenExpired => "Unauthorized: Expired Token",
            Self::TokenNotYetValid => "Unauthorized: Token Not Yet Valid",
            Self::TokenMalformed => "Unauthorized: Malformed Token",
            Self::InvalidSignature => "Unauthorized: Invalid Signature",
            Self::AudienceMismatch => "Unauthorized: Token 'aud' claim missing registered audience",
            Self::IssuerMismatch => "Unauthorized: Token uses invalid 'iss' claim",
            Self::MissingSubject => "Unauthorized: Token missing required 'sub' claim",
            Self::MissingScope { .. } => "Unauthorized: Token missing required 'scope' claim",
        }
    }

    /// Principal to report in the Deny, once the subject is known.
    pub fn principal(&self) -> &str {
        match self {
            Self::MissingScope { subject } => subject,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    // Issued by the identity provider's own user store
    User,
    // Machine-to-machine client
    App,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::App => "app",
        }
    }
}

/// Claims of a token that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub subject: String,
    pub kind: SubjectKind,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

/// Claims as they appear on the wire. Kept as `Value` so a wrong shape is a
/// claim error rather than a decode error.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    iss: serde_json::Value,
    #[serde(default)]
    aud: serde_json::Value,
    #[serde(default)]
    sub: serde_json::Value,
    #[serde(default)]
    scope: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct TokenValidator {
    issuer: String,
    audience: String,
    leeway_seconds: u64,
    user_subject_marker: String,
}

impl TokenValidator {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        leeway_seconds: u64,
        user_subject_marker: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_seconds,
            user_subject_marker: user_subject_marker.into(),
        }
    }

    pub async fn validate(&self, token: &str, keys: &JwksStore) -> Result<VerifiedToken, TokenError> {
        let header = decode_raw_header(token)?;

        let kid = header.kid.as_deref().ok_or(TokenError::KeyResolutionFailed)?;
        let jwk = keys
            .find_or_refresh(kid)
            .await
            .ok_or(TokenError::KeyResolutionFailed)?;

        let algorithm = rsa_algorithm(header.alg.as_deref())?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| {
            debug!(error = %e, kid, "unusable verification key");
            TokenError::KeyResolutionFailed
        })?;

        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;
        // Audience is checked below so a missing claim gets its own outcome
        validation.validate_aud = false;
        validation.leeway = self.leeway_seconds;

        let claims = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| classify(&e))?
            .claims;

        if !audience_contains(&claims.aud, &self.audience) {
            return Err(TokenError::AudienceMismatch);
        }

        match claims.iss.as_str() {
            Some(iss) if iss.contains(&self.issuer) => {}
            _ => return Err(TokenError::IssuerMismatch),
        }

        let subject = claims
            .sub
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or(TokenError::MissingSubject)?
            .to_string();

        let kind = self.classify_subject(&subject);

        let scope = match claims.scope.as_str() {
            Some(scope) if !scope.trim().is_empty() => scope.to_string(),
            _ => return Err(TokenError::MissingScope { subject }),
        };

        Ok(VerifiedToken {
            subject,
            kind,
            scope,
        })
    }

    pub fn classify_subject(&self, subject: &str) -> SubjectKind {
        if subject.contains(&self.user_subject_marker) {
            SubjectKind::User
        } else {
            SubjectKind::App
        }
    }
}

fn decode_raw_header(token: &str) -> Result<RawHeader, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::TokenMalformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::TokenMalformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::TokenMalformed)
}

fn rsa_algorithm(alg: Option<&str>) -> Result<Algorithm, TokenError> {
    match alg {
        Some("RS256") => Ok(Algorithm::RS256),
        Some("RS384") => Ok(Algorithm::RS384),
        Some("RS512") => Ok(Algorithm::RS512),
        _ => Err(TokenError::UnsupportedAlgorithm),
    }
}

fn classify(err: &jsonwebtoken::errors::Error) -> TokenError {
    debug!(error = %err, "token decode failed");
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::TokenExpired,
        ErrorKind::ImmatureSignature => TokenError::TokenNotYetValid,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm,
        ErrorKind::InvalidKeyFormat => TokenError::KeyResolutionFailed,
        _ => TokenError::TokenMalformed,
    }
}

fn audience_contains(aud: &serde_json::Value, expected: &str) -> bool {
    match aud {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(values) => values.iter().any(|v| v.as_str() == Some(expected)),
        // Missing claim ends up as Null due to #[serde(default)]
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        TEST_AUDIENCE, TEST_ISSUER, TEST_KID, claims_for, mint, mint_hs256, static_keys,
    };
    use serde_json::json;

    fn validator() -> TokenValidator {
        TokenValidator::new(TEST_ISSUER, TEST_AUDIENCE, 0, "auth0")
    }

    async fn check(claims: serde_json::Value) -> Result<VerifiedToken, TokenError> {
        validator().validate(&mint(&claims), &static_keys()).await
    }

    #[tokio::test]
    async fn app_token_passes() {
        let verified = check(claims_for("client-123@clients", "read:items write:items"))
            .await
            .unwrap();
        assert_eq!(verified.subject, "client-123@clients");
        assert_eq!(verified.kind, SubjectKind::App);
        assert_eq!(verified.scope, "read:items write:items");
    }

    #[tokio::test]
    async fn user_subject_is_classified() {
        let verified = check(claims_for("auth0|644b2a94", "openid profile"))
            .await
            .unwrap();
        assert_eq!(verified.kind, SubjectKind::User);
    }

    #[tokio::test]
    async fn single_string_audience_is_accepted() {
        let mut claims = claims_for("client@clients", "read:items");
        claims["aud"] = json!(TEST_AUDIENCE);
        assert!(check(claims).await.is_ok());
    }

    #[tokio::test]
    async fn expired_token() {
        let mut claims = claims_for("client@clients", "read:items");
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        assert_eq!(check(claims).await.unwrap_err(), TokenError::TokenExpired);
    }

    #[tokio::test]
    async fn token_not_yet_valid() {
        let mut claims = claims_for("client@clients", "read:items");
        claims["nbf"] = json!(chrono::Utc::now().timestamp() + 3600);
        assert_eq!(check(claims).await.unwrap_err(), TokenError::TokenNotYetValid);
    }

    #[tokio::test]
    async fn audience_mismatch() {
        let mut claims = claims_for("client@clients", "read:items");
        claims["aud"] = json!(["https://other.example.com"]);
        assert_eq!(check(claims).await.unwrap_err(), TokenError::AudienceMismatch);
    }

    #[tokio::test]
    async fn missing_or_malformed_audience() {
        let mut claims = claims_for("client@clients", "read:items");
        claims.as_object_mut().unwrap().remove("aud");
        assert_eq!(check(claims).await.unwrap_err(), TokenError::AudienceMismatch);

        let mut claims = claims_for("client@clients", "read:items");
        claims["aud"] = json!(42);
        assert_eq!(check(claims).await.unwrap_err(), TokenError::AudienceMismatch);
    }

    #[tokio::test]
    async fn issuer_mismatch() {
        let mut claims = claims_for("client@clients", "read:items");
        claims["iss"] = json!("https://evil.example.net/");
        assert_eq!(check(claims).await.unwrap_err(), TokenError::IssuerMismatch);

        let mut claims = claims_for("client@clients", "read:items");
        claims.as_object_mut().unwrap().remove("iss");
        assert_eq!(check(claims).await.unwrap_err(), TokenError::IssuerMismatch);
    }

    #[tokio::test]
    async fn missing_subject() {
        let mut claims = claims_for("client@clients", "read:items");
        claims.as_object_mut().unwrap().remove("sub");
        assert_eq!(check(claims).await.unwrap_err(), TokenError::MissingSubject);
    }

    #[tokio::test]
    async fn missing_scope_keeps_subject() {
        let mut claims = claims_for("client@clients", "read:items");
        claims.as_object_mut().unwrap().remove("scope");
        let err = check(claims).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::MissingScope {
                subject: "client@clients".to_string()
            }
        );
        assert_eq!(err.principal(), "client@clients");
    }

    #[tokio::test]
    async fn non_rsa_algorithm_is_rejected() {
        let token = mint_hs256(&claims_for("client@clients", "read:items"), TEST_KID);
        assert_eq!(
            validator().validate(&token, &static_keys()).await.unwrap_err(),
            TokenError::UnsupportedAlgorithm
        );
    }

    #[tokio::test]
    async fn unknown_kid_fails_key_resolution() {
        let token = mint_hs256(&claims_for("client@clients", "read:items"), "unknown");
        assert_eq!(
            validator().validate(&token, &static_keys()).await.unwrap_err(),
            TokenError::KeyResolutionFailed
        );
    }

    #[tokio::test]
    async fn tampered_payload_fails_signature() {
        let token = mint(&claims_for("client@clients", "read:items"));
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims_for("client@clients", "admin:everything")).unwrap(),
        );
        parts[1] = &forged;
        let forged_token = parts.join(".");

        assert_eq!(
            validator()
                .validate(&forged_token, &static_keys())
                .await
                .unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        for token in ["not-a-jwt", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            assert_eq!(
                validator().validate(token, &static_keys()).await.unwrap_err(),
                TokenError::TokenMalformed,
                "{token}"
            );
        }
    }

    #[test]
    fn deny_messages_name_the_problem() {
        assert!(TokenError::TokenExpired.deny_message().contains("Expired"));
        assert!(TokenError::AudienceMismatch.deny_message().contains("'aud'"));
        assert_eq!(TokenError::TokenExpired.principal(), "");
    }
}
