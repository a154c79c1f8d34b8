// JWT access tokens.

use async_trait::async_trait;
use chrono::Utc;
use crm_core::{Principal, Role};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{AuthError, Authenticator};
use crate::options::{JwtAlgorithm, JwtOptions};

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Access token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: Audience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// Canonicalize the claims into a principal. This is the only place a
    /// role string is interpreted; an unknown role becomes `User`.
    pub fn to_principal(&self) -> Result<Principal, AuthError> {
        let user_id = self
            .user_id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingClaim("userId"))?;
        let organization_id = self
            .organization_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingClaim("organizationId"))?;
        let role = Role::from_claim(self.role.as_deref().unwrap_or_default());
        Ok(Principal::new(role, organization_id, user_id))
    }
}

fn algorithm(alg: JwtAlgorithm) -> Algorithm {
    match alg {
        JwtAlgorithm::HS256 => Algorithm::HS256,
        JwtAlgorithm::HS384 => Algorithm::HS384,
        JwtAlgorithm::HS512 => Algorithm::HS512,
    }
}

/// HMAC-signed access tokens carrying the tenant and role of a user.
#[derive(Clone)]
pub struct JwtAuthenticator {
    options: JwtOptions,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("algorithm", &self.options.algorithm)
            .field("issuer", &self.options.issuer)
            .field("audience", &self.options.audience)
            .finish_non_exhaustive()
    }
}

impl JwtAuthenticator {
    pub fn new(options: JwtOptions) -> Result<Self, AuthError> {
        options.validate()?;
        let secret = options
            .secret
            .as_deref()
            .ok_or_else(|| AuthError::Misconfigured("JWT secret is not configured".into()))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            options,
        })
    }

    pub fn options(&self) -> &JwtOptions {
        &self.options
    }

    pub fn sign_access_token(&self, principal: &Principal, email: Option<&str>) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.options.access_token_expires_in.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: Some(principal.user_id.to_string()),
            user_id: Some(principal.user_id.to_string()),
            email: email.map(str::to_string),
            role: Some(principal.role.as_str().to_string()),
            organization_id: Some(principal.organization_id.to_string()),
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.options.issuer.clone(),
            aud: Audience::Many(self.options.audience.clone()),
            jti: Some(Uuid::new_v4().to_string()),
        };
        self.encode(&claims)
    }

    /// Sign arbitrary claims. Useful for tests that need odd payloads.
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header::new(algorithm(self.options.algorithm));
        encode(&header, claims, &self.encoding).map_err(|e| AuthError::Misconfigured(e.to_string()))
    }

    /// Check signature, expiry, issuer and audience.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(algorithm(self.options.algorithm));
        validation.set_issuer(&[self.options.issuer.as_str()]);
        validation.set_audience(&self.options.audience);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %e, "rejected access token");
                    AuthError::InvalidToken
                }
            })
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify(token)?.to_principal()
    }
}
