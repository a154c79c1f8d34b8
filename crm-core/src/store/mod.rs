//! Persistence seam.
//!
//! The policy never talks to a database directly: it hands predicates to a
//! [`ScopedStore`] and reads back JSON rows. Mutations carry the
//! [`RecordScope`] that was authorized so the store can refuse a write when
//! tenant or owner changed in between.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::CrmResult;
use crate::predicate::Predicate;
use crate::query::ScopedQuery;
use crate::resource::{ResourceKind, ORGANIZATION_FIELD};
use crate::tenant::{OrganizationId, Role, UserId};

pub use memory::MemoryStore;

/// Tenant, owner and relation columns of one stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordScope {
    pub organization_id: Option<OrganizationId>,
    pub owner_id: Option<UserId>,
    pub related_id: Option<String>,
}

impl RecordScope {
    pub fn of(kind: ResourceKind, row: &Value) -> Self {
        let text = |field: &str| row.get(field).and_then(Value::as_str).map(str::to_string);
        Self {
            organization_id: text(ORGANIZATION_FIELD).map(OrganizationId),
            owner_id: kind.owner_field().and_then(text).map(UserId),
            related_id: kind.relation().and_then(|r| text(r.field)),
        }
    }
}

/// The slice of a user row the access controller needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub organization_id: OrganizationId,
    pub role: Role,
}

impl UserRecord {
    /// `None` when the row lacks an id or organization.
    pub fn from_row(row: &Value) -> Option<Self> {
        let id = row.get("id")?.as_str()?;
        let org = row.get(ORGANIZATION_FIELD)?.as_str()?;
        let role = row
            .get("role")
            .and_then(Value::as_str)
            .map(Role::from_claim)
            .unwrap_or(Role::User);
        Some(Self {
            id: UserId::new(id),
            organization_id: OrganizationId::new(org),
            role,
        })
    }
}

#[async_trait]
pub trait ScopedStore: Send + Sync {
    /// Rows matching the query's predicate, sorted and paged, plus the
    /// total number of matching rows.
    async fn find(&self, query: &ScopedQuery) -> CrmResult<(Vec<Value>, usize)>;

    /// One row by id, only if it also satisfies `predicate`.
    async fn get(&self, kind: ResourceKind, id: &str, predicate: &Predicate) -> CrmResult<Option<Value>>;

    /// Fresh tenant/owner columns of a row, read at call time.
    async fn scope_of(&self, kind: ResourceKind, id: &str) -> CrmResult<Option<RecordScope>>;

    async fn user(&self, id: &UserId) -> CrmResult<Option<UserRecord>>;

    async fn insert(&self, kind: ResourceKind, row: Map<String, Value>) -> CrmResult<Value>;

    /// Merge `patch` into the row if its scope still equals `expected`.
    /// `None` when the row is gone or its scope changed.
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        expected: &RecordScope,
        patch: Map<String, Value>,
    ) -> CrmResult<Option<Value>>;

    /// Remove the row if its scope still equals `expected`.
    async fn delete(&self, kind: ResourceKind, id: &str, expected: &RecordScope) -> CrmResult<Option<Value>>;

    /// Change a user's role if the user still belongs to `organization_id`.
    async fn set_role(
        &self,
        user_id: &UserId,
        organization_id: &OrganizationId,
        role: Role,
    ) -> CrmResult<Option<UserRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_scope_reads_kind_specific_owner() {
        let row = json!({ "id": "c1", "organizationId": "org-1", "createdById": "u7", "assignedToId": "x" });
        let scope = RecordScope::of(ResourceKind::Campaigns, &row);
        assert_eq!(scope.owner_id, Some(UserId::new("u7")));
        assert_eq!(RecordScope::of(ResourceKind::Workflows, &row).owner_id, None);
    }

    #[test]
    fn record_scope_tracks_the_related_row() {
        let row = json!({ "id": "m1", "organizationId": "org-1", "leadId": "l1" });
        assert_eq!(RecordScope::of(ResourceKind::Messages, &row).related_id.as_deref(), Some("l1"));
        assert_eq!(RecordScope::of(ResourceKind::Notes, &row).related_id, None);
    }

    #[test]
    fn user_record_with_odd_role_fails_closed() {
        let row = json!({ "id": "u1", "organizationId": "org-1", "role": "owner" });
        assert_eq!(UserRecord::from_row(&row).unwrap().role, Role::User);
        assert!(UserRecord::from_row(&json!({ "id": "u1" })).is_none());
    }
}
