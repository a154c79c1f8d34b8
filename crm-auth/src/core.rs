// Authentication core.

use async_trait::async_trait;
use crm_core::{CrmError, Principal};
use http::header::AUTHORIZATION;
use http::HeaderMap;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No authorization header provided")]
    MissingToken,
    #[error("Invalid authorization header format. Expected: Bearer <token>")]
    MalformedHeader,
    #[error("Access token has expired")]
    Expired,
    #[error("Invalid access token")]
    InvalidToken,
    #[error("Access token is missing the '{0}' claim")]
    MissingClaim(&'static str),
    #[error("Authentication is misconfigured: {0}")]
    Misconfigured(String),
}

impl From<AuthError> for CrmError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Misconfigured(_) => CrmError::general_error("Authentication is unavailable"),
            other => CrmError::not_authenticated(other.to_string()),
        }
    }
}

/// `Authorization: Bearer <token>`. The scheme is matched case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?.trim();
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Turns a presented credential into a verified principal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;

    /// Extract the bearer token from `headers` and authenticate it.
    async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = extract_bearer_token(headers)?;
        self.authenticate(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc.def")), Ok("abc.def"));
        assert_eq!(extract_bearer_token(&headers("bearer   abc")), Ok("abc"));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken));
        assert_eq!(extract_bearer_token(&headers("Basic abc")), Err(AuthError::MalformedHeader));
        assert_eq!(extract_bearer_token(&headers("Bearer ")), Err(AuthError::MalformedHeader));
        assert_eq!(extract_bearer_token(&headers("abc")), Err(AuthError::MalformedHeader));
    }

    #[test]
    fn auth_errors_map_to_not_authenticated() {
        let err: CrmError = AuthError::Expired.into();
        assert_eq!(err.code(), 401);
        let err: CrmError = AuthError::Misconfigured("no secret".into()).into();
        assert_eq!(err.code(), 500);
    }
}
