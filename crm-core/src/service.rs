use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::access::{AccessController, MutationAction};
use crate::errors::CrmError;
use crate::predicate::Predicate;
use crate::query::{canonical_key, AdditionalFilters, ResourceQueryBuilder};
use crate::resource::{Ownership, ReferenceTarget, ResourceKind, ORGANIZATION_FIELD, REFERENCES};
use crate::store::{RecordScope, ScopedStore};
use crate::tenant::{Principal, Role, UserId};

/// Standard service methods, after Feathers: find, get, create, patch, remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceMethodKind {
    Find,
    Get,
    Create,
    Patch,
    Remove,
}

impl ServiceMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMethodKind::Find => "find",
            ServiceMethodKind::Get => "get",
            ServiceMethodKind::Create => "create",
            ServiceMethodKind::Patch => "patch",
            ServiceMethodKind::Remove => "remove",
        }
    }
}

/// Which methods a service exposes to transports.
#[derive(Debug, Clone)]
pub struct ServiceCapabilities {
    pub allowed_methods: Vec<ServiceMethodKind>,
}

impl ServiceCapabilities {
    pub fn standard_crud() -> Self {
        use ServiceMethodKind::*;
        Self {
            allowed_methods: vec![Find, Get, Create, Patch, Remove],
        }
    }

    pub fn read_only() -> Self {
        use ServiceMethodKind::*;
        Self {
            allowed_methods: vec![Find, Get],
        }
    }

    pub fn from_methods(methods: Vec<ServiceMethodKind>) -> Self {
        Self {
            allowed_methods: methods,
        }
    }

    pub fn allows(&self, method: ServiceMethodKind) -> bool {
        self.allowed_methods.contains(&method)
    }
}

/// One page of a scoped listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub rows: Vec<Value>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

fn not_implemented(method: ServiceMethodKind) -> anyhow::Error {
    CrmError::method_not_allowed(format!("Method not implemented: {}", method.as_str())).into_anyhow()
}

/// A resource service. Every method takes the verified principal; there is
/// no way to call one without a tenant.
///
/// Methods default to `MethodNotAllowed`, so a service overrides only what it
/// supports.
#[async_trait]
pub trait ScopedService: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities::standard_crud()
    }

    async fn find(&self, _principal: &Principal, _filters: &AdditionalFilters) -> Result<Page> {
        Err(not_implemented(ServiceMethodKind::Find))
    }

    async fn get(&self, _principal: &Principal, _id: &str) -> Result<Value> {
        Err(not_implemented(ServiceMethodKind::Get))
    }

    async fn create(&self, _principal: &Principal, _data: Value) -> Result<Value> {
        Err(not_implemented(ServiceMethodKind::Create))
    }

    async fn patch(&self, _principal: &Principal, _id: &str, _data: Value) -> Result<Value> {
        Err(not_implemented(ServiceMethodKind::Patch))
    }

    async fn remove(&self, _principal: &Principal, _id: &str) -> Result<Value> {
        Err(not_implemented(ServiceMethodKind::Remove))
    }
}

/// Columns the server owns on every row.
const SERVER_FIELDS: [&str; 4] = ["id", ORGANIZATION_FIELD, "createdAt", "updatedAt"];

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn into_object(kind: ResourceKind, data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(CrmError::bad_request(format!("{kind} data must be a JSON object")).into_anyhow()),
    }
}

/// The generic service behind every resource kind: tenant scope from the
/// query builder, action checks from the access controller, rows from the
/// store.
pub struct ResourceService {
    kind: ResourceKind,
    store: Arc<dyn ScopedStore>,
    builder: ResourceQueryBuilder,
    access: AccessController,
}

impl ResourceService {
    pub fn new(
        kind: ResourceKind,
        store: Arc<dyn ScopedStore>,
        builder: ResourceQueryBuilder,
        access: AccessController,
    ) -> Self {
        Self {
            kind,
            store,
            builder,
            access,
        }
    }

    fn ensure(&self, method: ServiceMethodKind) -> Result<()> {
        if !self.kind.is_tenant_scoped() && !matches!(method, ServiceMethodKind::Find | ServiceMethodKind::Get) {
            crate::bail_crm!(forbidden, "{} are read-only", self.kind);
        }
        if !self.capabilities().allows(method) {
            crate::bail_crm!(method_not_allowed, "Method '{}' is not allowed on {}", method.as_str(), self.kind);
        }
        Ok(())
    }

    /// Drop columns the client may not write. Keys are matched canonically,
    /// so `organization_id` is caught too.
    fn strip_server_fields(&self, principal: &Principal, data: &mut Map<String, Value>) {
        let protected: Vec<String> = SERVER_FIELDS.iter().map(|f| canonical_key(f)).collect();
        data.retain(|key, value| {
            let canon = canonical_key(key);
            if !protected.contains(&canon) {
                return true;
            }
            if canon == canonical_key(ORGANIZATION_FIELD) {
                tracing::warn!(
                    user_id = %principal.user_id,
                    organization_id = %principal.organization_id,
                    resource = %self.kind,
                    key = %key,
                    value = %value,
                    "dropped client-supplied organization"
                );
            }
            false
        });
    }

    /// Reads the owner value out of client data. `Some(None)` is an explicit
    /// unassign.
    fn requested_owner(&self, field: &str, data: &mut Map<String, Value>) -> Result<Option<Option<UserId>>> {
        let canon = canonical_key(field);
        let keys: Vec<String> = data.keys().filter(|k| canonical_key(k) == canon).cloned().collect();
        let mut requested = None;
        for key in keys {
            requested = match data.remove(&key) {
                Some(Value::Null) => Some(None),
                Some(Value::String(id)) if !id.trim().is_empty() => Some(Some(UserId::new(id))),
                _ => return Err(CrmError::validation(field, "must be a user id or null").into_anyhow()),
            };
        }
        Ok(requested)
    }

    /// Every reference column in client data must point inside the
    /// principal's reach. The owner column is handled by the caller.
    async fn check_references(&self, principal: &Principal, data: &Map<String, Value>) -> Result<()> {
        let owner = self.kind.owner_field().map(canonical_key);
        for (key, value) in data {
            let canon = canonical_key(key);
            if owner.as_ref() == Some(&canon) {
                continue;
            }
            let Some((_, target)) = REFERENCES.iter().find(|(field, _)| canonical_key(field) == canon) else {
                continue;
            };
            let id = match value {
                Value::Null => continue,
                Value::String(id) if !id.trim().is_empty() => id,
                _ => return Err(CrmError::validation(key, "must be an id or null").into_anyhow()),
            };
            match target {
                ReferenceTarget::User => {
                    self.access.verify_reference(principal, key, &UserId::new(id.clone())).await?
                }
                ReferenceTarget::Record(kind) => {
                    self.access.verify_record_reference(principal, key, *kind, id).await?
                }
            }
        }
        Ok(())
    }

    async fn check_rows(&self, rows: &[Value]) -> Result<()> {
        if self.kind.owner().is_none() {
            return Ok(());
        }
        for row in rows {
            let id = row.get("id").and_then(Value::as_str).unwrap_or_default();
            self.access
                .verify_owner_integrity(self.kind, id, &RecordScope::of(self.kind, row))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScopedService for ResourceService {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn capabilities(&self) -> ServiceCapabilities {
        match self.kind {
            ResourceKind::Users | ResourceKind::CampaignTemplates => ServiceCapabilities::read_only(),
            _ => ServiceCapabilities::standard_crud(),
        }
    }

    async fn find(&self, principal: &Principal, filters: &AdditionalFilters) -> Result<Page> {
        self.ensure(ServiceMethodKind::Find)?;
        let query = self.builder.build(principal, self.kind, filters)?;
        let (rows, total) = self.store.find(&query).await?;
        self.check_rows(&rows).await?;

        let limit = query.pagination.limit;
        Ok(Page {
            rows,
            total,
            page: query.pagination.page,
            limit,
            pages: total.div_ceil(limit),
        })
    }

    async fn get(&self, principal: &Principal, id: &str) -> Result<Value> {
        self.ensure(ServiceMethodKind::Get)?;
        let predicate = Predicate::scoped(self.builder.resolver().resolve(principal, self.kind));
        let row = self
            .store
            .get(self.kind, id, &predicate)
            .await?
            .ok_or_else(|| CrmError::not_found(format!("No record found for id '{id}'")).into_anyhow())?;
        self.check_rows(std::slice::from_ref(&row)).await?;
        Ok(row)
    }

    async fn create(&self, principal: &Principal, data: Value) -> Result<Value> {
        self.ensure(ServiceMethodKind::Create)?;
        let mut data = into_object(self.kind, data)?;
        self.strip_server_fields(principal, &mut data);
        self.check_references(principal, &data).await?;

        if let Some(owner) = self.kind.owner() {
            let requested = self.requested_owner(owner.field, &mut data)?;
            let assigned = match (owner.ownership, principal.role) {
                (Ownership::Assignable, Role::Admin | Role::Manager) => match requested {
                    Some(Some(user_id)) => {
                        self.access.verify_reference(principal, owner.field, &user_id).await?;
                        Value::String(user_id.0)
                    }
                    Some(None) => Value::Null,
                    None => Value::String(principal.user_id.0.clone()),
                },
                (Ownership::Assignable, Role::User) => {
                    if matches!(&requested, Some(Some(id)) if id != &principal.user_id) {
                        return Err(CrmError::forbidden(format!(
                            "You cannot assign {} to another user",
                            self.kind
                        ))
                        .into_anyhow());
                    }
                    Value::String(principal.user_id.0.clone())
                }
                _ => Value::String(principal.user_id.0.clone()),
            };
            data.insert(owner.field.to_string(), assigned);
        }

        let stamp = now();
        data.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        data.insert(
            ORGANIZATION_FIELD.into(),
            Value::String(principal.organization_id.0.clone()),
        );
        data.insert("createdAt".into(), stamp.clone());
        data.insert("updatedAt".into(), stamp);

        let row = self.store.insert(self.kind, data).await?;
        tracing::debug!(resource = %self.kind, id = ?row.get("id"), "created");
        Ok(row)
    }

    async fn patch(&self, principal: &Principal, id: &str, data: Value) -> Result<Value> {
        self.ensure(ServiceMethodKind::Patch)?;
        let mut data = into_object(self.kind, data)?;
        let grant = self
            .access
            .authorize_mutation(principal, self.kind, id, MutationAction::Update)
            .await?;
        self.strip_server_fields(principal, &mut data);
        self.check_references(principal, &data).await?;

        if let Some(owner) = self.kind.owner() {
            let requested = self.requested_owner(owner.field, &mut data)?;
            if let Some(requested) = requested {
                let unchanged = requested.as_ref() == grant.scope.owner_id.as_ref();
                match (owner.ownership, principal.role) {
                    _ if unchanged => {}
                    (Ownership::Assignable, Role::Admin | Role::Manager) => {
                        if let Some(user_id) = &requested {
                            self.access.verify_reference(principal, owner.field, user_id).await?;
                        }
                        data.insert(
                            owner.field.to_string(),
                            requested.map_or(Value::Null, |u| Value::String(u.0)),
                        );
                    }
                    (Ownership::Assignable, Role::User) => {
                        return Err(CrmError::forbidden(format!(
                            "You cannot reassign this {}",
                            self.kind
                        ))
                        .into_anyhow());
                    }
                    _ => {
                        return Err(CrmError::forbidden(format!("'{}' cannot be changed", owner.field)).into_anyhow());
                    }
                }
            }
        }

        data.insert("updatedAt".into(), now());
        self.store
            .update(self.kind, id, &grant.scope, data)
            .await?
            .ok_or_else(|| {
                CrmError::conflict(format!("{} '{id}' changed while it was being updated", self.kind)).into_anyhow()
            })
    }

    async fn remove(&self, principal: &Principal, id: &str) -> Result<Value> {
        self.ensure(ServiceMethodKind::Remove)?;
        let grant = self
            .access
            .authorize_mutation(principal, self.kind, id, MutationAction::Delete)
            .await?;
        self.store
            .delete(self.kind, id, &grant.scope)
            .await?
            .ok_or_else(|| {
                CrmError::conflict(format!("{} '{id}' changed while it was being deleted", self.kind)).into_anyhow()
            })
    }
}
