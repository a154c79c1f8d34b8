//! Tenant scope resolution.

use crate::predicate::ScopePredicate;
use crate::resource::ResourceKind;
use crate::tenant::{Principal, Role};

/// Produces the mandatory base predicate for a principal and resource kind.
///
/// Pure and stateless: identical inputs always give equal predicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantScopeResolver;

impl TenantScopeResolver {
    pub fn new() -> Self {
        Self
    }

    /// `organizationId == principal.organization_id`, plus for USER either
    /// `owner == principal.user_id` on owned kinds or a relation clause on
    /// kinds that follow a related row.
    ///
    /// Kinds that are not tenant-scoped resolve to an unrestricted predicate;
    /// callers decide whether that is acceptable for the operation.
    pub fn resolve(&self, principal: &Principal, kind: ResourceKind) -> ScopePredicate {
        if !kind.is_tenant_scoped() {
            return ScopePredicate::unrestricted();
        }

        let scope = ScopePredicate::organization(principal.organization_id.clone());
        match (principal.role, kind.owner_field(), kind.relation()) {
            (Role::User, Some(field), _) => scope.and_owner(field, principal.user_id.clone()),
            (Role::User, None, Some(relation)) => scope.and_related(relation, principal.user_id.clone()),
            _ => scope,
        }
    }
}
