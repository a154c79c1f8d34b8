//! Multi-tenant identity types.
//!
//! A [`Principal`] is derived once per request from a verified token and is
//! immutable afterwards. Roles are a closed enum: they are parsed and
//! canonicalized here, at the boundary, so the rest of the crate never
//! compares role strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CrmError;

/// Organization (tenant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a user inside its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::User];

    /// Canonical wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::User => "USER",
        }
    }

    /// ADMIN and MANAGER both see the whole organization.
    pub fn sees_whole_organization(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }

    /// Lenient parse for role claims coming out of an already verified token.
    ///
    /// Fails closed: anything unrecognized becomes [`Role::User`].
    pub fn from_claim(raw: &str) -> Role {
        match raw.parse::<Role>() {
            Ok(role) => role,
            Err(_) => {
                tracing::warn!(claim = %raw, "unrecognized role claim, treating as USER");
                Role::User
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CrmError;

    /// Strict, case-insensitive parse. Used for role values supplied in
    /// request bodies, where an unknown value is a caller error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" => Ok(Role::Manager),
            "USER" => Ok(Role::User),
            _ => Err(CrmError::validation(
                "role",
                format!("'{s}' is not one of ADMIN, MANAGER, USER"),
            )),
        }
    }
}

/// The authenticated identity and role context for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub role: Role,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
}

impl Principal {
    pub fn new(role: Role, organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            role,
            organization_id: OrganizationId::new(organization_id),
            user_id: UserId::new(user_id),
        }
    }

    pub fn admin(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(Role::Admin, organization_id, user_id)
    }

    pub fn manager(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(Role::Manager, organization_id, user_id)
    }

    pub fn user(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(Role::User, organization_id, user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn belongs_to(&self, organization_id: &OrganizationId) -> bool {
        &self.organization_id == organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(" USER ".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn strict_parse_rejects_unknown_roles() {
        let err = "AGENT".parse::<Role>().unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn claim_parse_fails_closed() {
        assert_eq!(Role::from_claim("superuser"), Role::User);
        assert_eq!(Role::from_claim("admin"), Role::Admin);
    }

    #[test]
    fn roles_serialize_uppercase() {
        let json = serde_json::to_string(&Role::Manager).unwrap();
        assert_eq!(json, "\"MANAGER\"");
    }
}
