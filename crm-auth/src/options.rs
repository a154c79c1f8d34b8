// Authentication options and configuration.

use std::time::Duration;

use crm_core::CrmConfigSnapshot;
use serde::{Deserialize, Serialize};

use crate::core::AuthError;

/// HMAC signing algorithms. Tokens are signed with a shared secret.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// HMAC using SHA-256
    #[default]
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
}

impl std::str::FromStr for JwtAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(AuthError::Misconfigured(format!("unsupported JWT algorithm '{other}'"))),
        }
    }
}

/// JWT-specific configuration options
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtOptions {
    pub algorithm: JwtAlgorithm,
    /// Token issuer (iss claim)
    pub issuer: String,
    /// Token audience (aud claim)
    pub audience: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub access_token_expires_in: Duration,
    /// Signing secret. Required; there is no built-in fallback.
    pub secret: Option<String>,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::default(),
            issuer: "crm-api".to_string(),
            audience: vec!["crm-client".to_string()],
            access_token_expires_in: Duration::from_secs(15 * 60),
            secret: None,
        }
    }
}

impl JwtOptions {
    /// Read `auth.*` keys from a config snapshot on top of the defaults:
    ///
    /// | key | example |
    /// |---|---|
    /// | `auth.secret` | `s3cr3t` |
    /// | `auth.algorithm` | `HS512` |
    /// | `auth.issuer` | `crm-api` |
    /// | `auth.audience` | `crm-client,crm-mobile` |
    /// | `auth.expires_in` | `15m` |
    pub fn from_snapshot(cfg: &CrmConfigSnapshot) -> Result<Self, AuthError> {
        let mut opts = Self::default();
        if let Some(secret) = cfg.get_string("auth.secret") {
            opts.secret = Some(secret);
        }
        if let Some(alg) = cfg.get("auth.algorithm") {
            opts.algorithm = alg.parse()?;
        }
        if let Some(issuer) = cfg.get_string("auth.issuer") {
            opts.issuer = issuer;
        }
        if let Some(audience) = cfg.get("auth.audience") {
            opts.audience = audience
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = cfg.get("auth.expires_in") {
            opts.access_token_expires_in = humantime_serde::re::humantime::parse_duration(raw.trim())
                .map_err(|e| AuthError::Misconfigured(format!("auth.expires_in: {e}")))?;
        }
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.issuer.is_empty() {
            return Err(AuthError::Misconfigured("JWT issuer cannot be empty".into()));
        }
        if self.audience.is_empty() {
            return Err(AuthError::Misconfigured("JWT audience cannot be empty".into()));
        }
        match &self.secret {
            Some(s) if !s.is_empty() => {}
            _ => return Err(AuthError::Misconfigured("HMAC algorithms require a secret".into())),
        }
        if self.access_token_expires_in.as_secs() == 0 {
            return Err(AuthError::Misconfigured(
                "Access token expiration must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
