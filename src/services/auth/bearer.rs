//! Bearer token extraction from the gateway's authorizer request.
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BearerError {
    #[error("expected request type 'TOKEN', got '{0}'")]
    UnsupportedRequestType(String),
    #[error("expected authorization token to not be empty")]
    EmptyToken,
    #[error("invalid authorization token - the provided 'Authorization' header does not match 'Bearer .*'")]
    MalformedHeader,
}

impl BearerError {
    /// Text placed in the Deny context.
    pub fn deny_message(&self) -> &'static str {
        match self {
            Self::MalformedHeader => "Unauthorized: invalid authorization token",
            _ => "Unauthorized",
        }
    }
}

/// Returns everything after the literal `Bearer ` prefix, untouched.
pub fn extract_bearer<'a>(
    request_type: &str,
    authorization_token: &'a str,
) -> Result<&'a str, BearerError> {
    if request_type != "TOKEN" {
        return Err(BearerError::UnsupportedRequestType(request_type.to_string()));
    }

    if authorization_token.is_empty() {
        return Err(BearerError::EmptyToken);
    }

    let token = authorization_token
        .strip_prefix(BEARER_PREFIX)
        .filter(|t| !t.is_empty())
        .ok_or(BearerError::MalformedHeader)?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_after_prefix() {
        assert_eq!(extract_bearer("TOKEN", "Bearer abc.def.ghi"), Ok("abc.def.ghi"));
    }

    #[test]
    fn remainder_is_not_trimmed() {
        assert_eq!(extract_bearer("TOKEN", "Bearer  abc "), Ok(" abc "));
    }

    #[test]
    fn rejects_other_request_types() {
        assert_eq!(
            extract_bearer("REQUEST", "Bearer abc"),
            Err(BearerError::UnsupportedRequestType("REQUEST".to_string()))
        );
    }

    #[test]
    fn rejects_empty_token() {
        assert_eq!(extract_bearer("TOKEN", ""), Err(BearerError::EmptyToken));
    }

    #[test]
    fn prefix_is_case_sensitive_and_needs_a_value() {
        for header in ["bearer abc", "Basic abc", "Bearer", "Bearer ", "abc"] {
            assert_eq!(
                extract_bearer("TOKEN", header),
                Err(BearerError::MalformedHeader),
                "{header:?}"
            );
        }
    }

    #[test]
    fn deny_messages() {
        assert_eq!(BearerError::EmptyToken.deny_message(), "Unauthorized");
        assert!(BearerError::MalformedHeader
            .deny_message()
            .contains("invalid authorization token"));
    }
}
