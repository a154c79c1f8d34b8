use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::access::{AccessController, MutationAction, MutationGrant, RoleChangeGrant};
use crate::config::{CrmConfig, CrmConfigSnapshot};
use crate::errors::{CrmError, PolicyResult};
use crate::query::{AdditionalFilters, QueryConfig, ResourceQueryBuilder};
use crate::registry::ServiceRegistry;
use crate::resource::ResourceKind;
use crate::service::{Page, ResourceService, ScopedService};
use crate::store::{ScopedStore, UserRecord};
use crate::tenant::{Principal, Role, UserId};

struct CrmAppInner {
    store: Arc<dyn ScopedStore>,
    config: CrmConfigSnapshot,
    builder: ResourceQueryBuilder,
    access: AccessController,
    registry: ServiceRegistry,
}

/// CrmApp is the composition root.
///
/// Framework-agnostic. Holds:
/// - the store
/// - a config snapshot
/// - the query builder and access controller
/// - one service per resource kind
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct CrmApp {
    inner: Arc<CrmAppInner>,
}

impl CrmApp {
    /// Wire a [`ResourceService`] for every known kind on top of `store`.
    pub fn new(store: Arc<dyn ScopedStore>, config: &CrmConfig) -> Self {
        let config = config.snapshot();
        let builder = ResourceQueryBuilder::new(QueryConfig::from_snapshot(&config));
        let access = AccessController::new(store.clone());

        let mut registry = ServiceRegistry::new();
        for kind in ResourceKind::ALL {
            registry.register(Arc::new(ResourceService::new(
                kind,
                store.clone(),
                builder.clone(),
                access.clone(),
            )));
        }

        Self {
            inner: Arc::new(CrmAppInner {
                store,
                config,
                builder,
                access,
                registry,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ScopedStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &CrmConfigSnapshot {
        &self.inner.config
    }

    pub fn query_builder(&self) -> &ResourceQueryBuilder {
        &self.inner.builder
    }

    pub fn access(&self) -> &AccessController {
        &self.inner.access
    }

    pub fn service(&self, kind: ResourceKind) -> Result<Arc<dyn ScopedService>> {
        self.inner
            .registry
            .get(kind)
            .cloned()
            .ok_or_else(|| CrmError::not_found(format!("No service registered for {kind}")).into_anyhow())
    }

    pub async fn list_scoped(&self, principal: &Principal, kind: ResourceKind, filters: &AdditionalFilters) -> Result<Page> {
        self.service(kind)?.find(principal, filters).await
    }

    pub async fn get_scoped(&self, principal: &Principal, kind: ResourceKind, id: &str) -> Result<Value> {
        self.service(kind)?.get(principal, id).await
    }

    pub async fn authorize_mutation(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: &str,
        action: MutationAction,
    ) -> PolicyResult<MutationGrant> {
        self.inner.access.authorize_mutation(principal, kind, id, action).await
    }

    pub async fn authorize_role_change(
        &self,
        principal: &Principal,
        target_user_id: &UserId,
        new_role: Role,
    ) -> PolicyResult<RoleChangeGrant> {
        self.inner
            .access
            .authorize_role_change(principal, target_user_id, new_role)
            .await
    }

    pub async fn create_scoped(&self, principal: &Principal, kind: ResourceKind, data: Value) -> Result<Value> {
        self.service(kind)?.create(principal, data).await
    }

    pub async fn update_scoped(&self, principal: &Principal, kind: ResourceKind, id: &str, data: Value) -> Result<Value> {
        self.service(kind)?.patch(principal, id, data).await
    }

    pub async fn delete_scoped(&self, principal: &Principal, kind: ResourceKind, id: &str) -> Result<Value> {
        self.service(kind)?.remove(principal, id).await
    }

    /// Authorize and apply a role change in one call.
    pub async fn change_role(&self, principal: &Principal, target_user_id: &UserId, new_role: Role) -> Result<UserRecord> {
        let grant = self.authorize_role_change(principal, target_user_id, new_role).await?;
        let (_, user) = self.inner.access.apply_role_change(grant).await?;
        Ok(user)
    }
}
