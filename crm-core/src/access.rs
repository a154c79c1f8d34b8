//! Action authorization.
//!
//! Visibility is handled by predicates; this module decides whether a
//! principal may perform an action at all. Every decision re-reads the
//! tenant and owner columns from the store at decision time.

use std::fmt;
use std::sync::Arc;

use crate::errors::{CrmError, PolicyResult};
use crate::predicate::Predicate;
use crate::resource::{Ownership, ResourceKind};
use crate::scope::TenantScopeResolver;
use crate::store::{RecordScope, ScopedStore, UserRecord};
use crate::tenant::{OrganizationId, Principal, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Update,
    Delete,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        })
    }
}

/// Permission to mutate one record, bound to the scope observed when it was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationGrant {
    pub kind: ResourceKind,
    pub id: String,
    pub action: MutationAction,
    pub scope: RecordScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChangeState {
    Requested,
    Validated,
    Applied,
    Rejected,
}

/// A role mutation moving through `Requested → Validated → Applied`, or
/// into `Rejected` on the first failed precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChangeGrant {
    principal: Principal,
    target: UserId,
    new_role: Role,
    state: RoleChangeState,
}

impl RoleChangeGrant {
    pub fn request(principal: Principal, target: UserId, new_role: Role) -> Self {
        Self {
            principal,
            target,
            new_role,
            state: RoleChangeState::Requested,
        }
    }

    pub fn state(&self) -> RoleChangeState {
        self.state
    }

    pub fn target(&self) -> &UserId {
        &self.target
    }

    pub fn new_role(&self) -> Role {
        self.new_role
    }

    fn reject(&mut self, reason: &str) -> CrmError {
        self.state = RoleChangeState::Rejected;
        tracing::info!(
            actor = %self.principal.user_id,
            organization_id = %self.principal.organization_id,
            target = %self.target,
            new_role = %self.new_role,
            reason,
            "role change rejected"
        );
        CrmError::forbidden("You are not allowed to change this user's role")
    }

    /// `Requested → Validated`: only an ADMIN, and never on their own account.
    fn validate(&mut self) -> PolicyResult<()> {
        if self.state != RoleChangeState::Requested {
            return Err(self.reject("role change is not in the requested state"));
        }
        if self.principal.role != Role::Admin {
            return Err(self.reject("only administrators can change roles"));
        }
        if self.principal.user_id == self.target {
            return Err(self.reject("administrators cannot change their own role"));
        }
        self.state = RoleChangeState::Validated;
        Ok(())
    }

    /// The target must exist inside the principal's organization. A missing
    /// target is rejected the same way as a foreign one.
    fn confirm_target(&mut self, target: Option<&UserRecord>) -> PolicyResult<()> {
        match target {
            Some(user) if user.organization_id == self.principal.organization_id => Ok(()),
            Some(_) => Err(self.reject("target belongs to another organization")),
            None => Err(self.reject("target user does not exist")),
        }
    }
}

/// Authorizes actions against the store.
#[derive(Clone)]
pub struct AccessController {
    store: Arc<dyn ScopedStore>,
}

impl AccessController {
    pub fn new(store: Arc<dyn ScopedStore>) -> Self {
        Self { store }
    }

    /// Gate for elevated endpoints.
    pub fn require_role(principal: &Principal, allowed: &[Role]) -> PolicyResult<()> {
        if allowed.contains(&principal.role) {
            Ok(())
        } else {
            Err(CrmError::forbidden(format!(
                "Access denied. Requires one of: {}",
                allowed.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
            )))
        }
    }

    async fn load_user(&self, id: &UserId) -> PolicyResult<Option<UserRecord>> {
        self.store.user(id).await.map_err(CrmError::normalize)
    }

    /// Validates a role change and returns it in the `Validated` state.
    pub async fn authorize_role_change(
        &self,
        principal: &Principal,
        target_user_id: &UserId,
        new_role: Role,
    ) -> PolicyResult<RoleChangeGrant> {
        let mut change = RoleChangeGrant::request(principal.clone(), target_user_id.clone(), new_role);
        change.validate()?;
        let target = self.load_user(target_user_id).await?;
        change.confirm_target(target.as_ref())?;
        Ok(change)
    }

    /// `Validated → Applied`. The store re-checks the organization under its
    /// own write, so a target that moved in the meantime is rejected and
    /// nothing is written.
    pub async fn apply_role_change(&self, mut change: RoleChangeGrant) -> PolicyResult<(RoleChangeGrant, UserRecord)> {
        if change.state != RoleChangeState::Validated {
            return Err(change.reject("role change was not validated"));
        }
        let target = self.load_user(&change.target).await?;
        change.confirm_target(target.as_ref())?;

        let updated = self
            .store
            .set_role(&change.target, &change.principal.organization_id, change.new_role)
            .await
            .map_err(CrmError::normalize)?;
        match updated {
            Some(user) => {
                change.state = RoleChangeState::Applied;
                tracing::info!(
                    actor = %change.principal.user_id,
                    target = %change.target,
                    new_role = %change.new_role,
                    "role changed"
                );
                Ok((change, user))
            }
            None => Err(change.reject("target changed before the role could be applied")),
        }
    }

    /// Decide whether `principal` may update or delete one record.
    ///
    /// - missing, or in another organization: `NotFound`
    /// - USER on an owned kind they do not own: `Forbidden`
    /// - USER on a related kind whose related row is not theirs: `Forbidden`
    /// - owner belongs to a different organization: `PolicyInvariantViolation`
    pub async fn authorize_mutation(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: &str,
        action: MutationAction,
    ) -> PolicyResult<MutationGrant> {
        if !kind.is_tenant_scoped() {
            return Err(CrmError::forbidden(format!("{kind} are read-only")));
        }

        let not_found = || CrmError::not_found(format!("No record found for id '{id}'"));
        let scope = self
            .store
            .scope_of(kind, id)
            .await
            .map_err(CrmError::normalize)?
            .ok_or_else(not_found)?;

        if scope.organization_id.as_ref() != Some(&principal.organization_id) {
            return Err(not_found());
        }

        self.verify_owner_integrity(kind, id, &scope).await?;

        if principal.role == Role::User {
            if let Some(owner) = kind.owner() {
                let owns = scope.owner_id.as_ref() == Some(&principal.user_id);
                if !owns {
                    return Err(CrmError::forbidden(format!(
                        "You do not have permission to {action} this record"
                    )));
                }
                if owner.ownership == Ownership::SelfRecord && action == MutationAction::Delete {
                    return Err(CrmError::forbidden("You cannot delete your own account"));
                }
            }
            if kind.relation().is_some() && !self.visible(principal, kind, id).await? {
                return Err(CrmError::forbidden(format!(
                    "You do not have permission to {action} this record"
                )));
            }
        }

        Ok(MutationGrant {
            kind,
            id: id.to_string(),
            action,
            scope,
        })
    }

    /// The owner referenced by a row must belong to the row's organization.
    /// Anything else is corrupted data: logged and failed closed.
    pub async fn verify_owner_integrity(&self, kind: ResourceKind, id: &str, scope: &RecordScope) -> PolicyResult<()> {
        let (Some(org), Some(owner)) = (&scope.organization_id, &scope.owner_id) else {
            return Ok(());
        };
        let owner_org = self.load_user(owner).await?.map(|u| u.organization_id);
        if owner_org.as_ref() == Some(org) {
            return Ok(());
        }
        tracing::error!(
            resource = %kind,
            id,
            organization_id = %org,
            owner_id = %owner,
            owner_organization_id = owner_org.as_ref().map(OrganizationId::as_str),
            "tenant invariant violated: owner outside the record's organization"
        );
        Err(CrmError::invariant_violation(format!(
            "{kind} '{id}' references owner '{owner}' outside organization '{org}'"
        )))
    }

    async fn visible(&self, principal: &Principal, kind: ResourceKind, id: &str) -> PolicyResult<bool> {
        let predicate = Predicate::scoped(TenantScopeResolver.resolve(principal, kind));
        let row = self.store.get(kind, id, &predicate).await.map_err(CrmError::normalize)?;
        Ok(row.is_some())
    }

    /// An id written into a reference column must name a row the principal
    /// can see.
    pub async fn verify_record_reference(
        &self,
        principal: &Principal,
        field: &str,
        kind: ResourceKind,
        id: &str,
    ) -> PolicyResult<()> {
        if self.visible(principal, kind, id).await? {
            Ok(())
        } else {
            Err(CrmError::validation(field, format!("'{id}' is not one of your {kind}")))
        }
    }

    /// A user id written into a user column must name a user of the
    /// principal's organization.
    pub async fn verify_reference(&self, principal: &Principal, field: &str, user_id: &UserId) -> PolicyResult<()> {
        match self.load_user(user_id).await? {
            Some(user) if principal.belongs_to(&user.organization_id) => Ok(()),
            _ => Err(CrmError::validation(
                field,
                format!("'{user_id}' is not a user of this organization"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn controller() -> (Arc<MemoryStore>, AccessController) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                ResourceKind::Users,
                vec![
                    json!({ "id": "admin-1", "organizationId": "org-123", "role": "ADMIN" }),
                    json!({ "id": "agent-1", "organizationId": "org-123", "role": "USER" }),
                    json!({ "id": "outsider", "organizationId": "org-xyz", "role": "USER" }),
                ],
            )
            .unwrap();
        let ctl = AccessController::new(store.clone());
        (store, ctl)
    }

    #[tokio::test]
    async fn admin_changes_a_colleague_role() {
        let (store, ctl) = controller();
        let admin = Principal::admin("org-123", "admin-1");
        let change = ctl
            .authorize_role_change(&admin, &UserId::new("agent-1"), Role::Manager)
            .await
            .unwrap();
        assert_eq!(change.state(), RoleChangeState::Validated);

        let (change, user) = ctl.apply_role_change(change).await.unwrap();
        assert_eq!(change.state(), RoleChangeState::Applied);
        assert_eq!(user.role, Role::Manager);
        assert_eq!(store.raw(ResourceKind::Users, "agent-1").unwrap()["role"], "MANAGER");
    }

    #[tokio::test]
    async fn self_change_is_forbidden_for_every_role() {
        let (_, ctl) = controller();
        let admin = Principal::admin("org-123", "admin-1");
        for role in Role::ALL {
            let err = ctl
                .authorize_role_change(&admin, &UserId::new("admin-1"), role)
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Forbidden);
        }
    }

    #[tokio::test]
    async fn managers_cannot_change_roles() {
        let (_, ctl) = controller();
        let manager = Principal::manager("org-123", "manager-1");
        let err = ctl
            .authorize_role_change(&manager, &UserId::new("agent-1"), Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn unknown_and_foreign_targets_look_the_same() {
        let (_, ctl) = controller();
        let admin = Principal::admin("org-123", "admin-1");
        let foreign = ctl
            .authorize_role_change(&admin, &UserId::new("outsider"), Role::User)
            .await
            .unwrap_err();
        let missing = ctl
            .authorize_role_change(&admin, &UserId::new("ghost"), Role::User)
            .await
            .unwrap_err();
        assert_eq!(foreign.to_json(), missing.to_json());
    }

    #[tokio::test]
    async fn apply_rejects_a_target_that_moved() {
        let (store, ctl) = controller();
        let admin = Principal::admin("org-123", "admin-1");
        let change = ctl
            .authorize_role_change(&admin, &UserId::new("agent-1"), Role::Admin)
            .await
            .unwrap();

        store
            .seed(
                ResourceKind::Users,
                vec![json!({ "id": "agent-1", "organizationId": "org-xyz", "role": "USER" })],
            )
            .unwrap();

        let err = ctl.apply_role_change(change).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
        assert_eq!(store.raw(ResourceKind::Users, "agent-1").unwrap()["role"], "USER");
    }

    fn seed_messages(store: &MemoryStore) {
        store
            .seed(
                ResourceKind::Leads,
                vec![
                    json!({ "id": "mine", "organizationId": "org-123", "assignedToId": "agent-1" }),
                    json!({ "id": "theirs", "organizationId": "org-123", "assignedToId": "admin-1" }),
                    json!({ "id": "far", "organizationId": "org-xyz", "assignedToId": "outsider" }),
                ],
            )
            .unwrap();
        store
            .seed(
                ResourceKind::Messages,
                vec![
                    json!({ "id": "m-mine", "organizationId": "org-123", "leadId": "mine" }),
                    json!({ "id": "m-theirs", "organizationId": "org-123", "leadId": "theirs" }),
                ],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn user_mutates_only_messages_on_their_leads() {
        let (store, ctl) = controller();
        seed_messages(&store);
        let agent = Principal::user("org-123", "agent-1");

        let grant = ctl
            .authorize_mutation(&agent, ResourceKind::Messages, "m-mine", MutationAction::Update)
            .await
            .unwrap();
        assert_eq!(grant.scope.related_id.as_deref(), Some("mine"));

        let err = ctl
            .authorize_mutation(&agent, ResourceKind::Messages, "m-theirs", MutationAction::Delete)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let admin = Principal::admin("org-123", "admin-1");
        assert!(ctl
            .authorize_mutation(&admin, ResourceKind::Messages, "m-mine", MutationAction::Delete)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn record_references_must_be_visible() {
        let (store, ctl) = controller();
        seed_messages(&store);
        let agent = Principal::user("org-123", "agent-1");
        let admin = Principal::admin("org-123", "admin-1");

        assert!(ctl.verify_record_reference(&agent, "leadId", ResourceKind::Leads, "mine").await.is_ok());
        let err = ctl
            .verify_record_reference(&agent, "leadId", ResourceKind::Leads, "theirs")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(ctl.verify_record_reference(&admin, "leadId", ResourceKind::Leads, "theirs").await.is_ok());
        assert!(ctl.verify_record_reference(&admin, "leadId", ResourceKind::Leads, "far").await.is_err());
    }

    #[tokio::test]
    async fn require_role_lists_the_allowed_roles() {
        let err = AccessController::require_role(&Principal::user("o", "u"), &[Role::Admin, Role::Manager])
            .unwrap_err();
        assert!(err.message.contains("ADMIN, MANAGER"));
        assert!(AccessController::require_role(&Principal::manager("o", "u"), &[Role::Admin, Role::Manager]).is_ok());
    }
}
