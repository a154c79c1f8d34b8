use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use crm_core::{CrmError, Principal, ResourceKind, Role};
use serde::Deserialize;

use crate::{CrmAxumError, CrmAxumState};

/// The verified principal of the request. Extraction fails with 401 when
/// the bearer token is missing or invalid.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<CrmAxumState> for Authenticated {
    type Rejection = CrmAxumError;

    async fn from_request_parts(parts: &mut Parts, state: &CrmAxumState) -> Result<Self, Self::Rejection> {
        let principal = state.auth.authenticate_headers(&parts.headers).await.map_err(|e| {
            tracing::debug!(error = %e, path = %parts.uri.path(), "authentication failed");
            CrmAxumError::from(e)
        })?;
        Ok(Self(principal))
    }
}

/// Path segment to resource kind; unknown names are 404.
pub fn resource_kind(segment: &str) -> Result<ResourceKind, CrmAxumError> {
    segment.parse::<ResourceKind>().map_err(CrmAxumError::from)
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeBody {
    pub role: String,
}

impl RoleChangeBody {
    /// Strict parse: only `ADMIN`, `MANAGER` or `USER` (any case).
    pub fn role(&self) -> Result<Role, CrmError> {
        self.role.parse()
    }
}
