//! crm-core: framework-agnostic tenant policy for the CRM backend.
//!
//! Every read goes through [`ResourceQueryBuilder`], which starts from the
//! mandatory predicate of [`TenantScopeResolver`]. Every mutation goes
//! through [`AccessController`] first.

pub mod access;
pub mod app;
pub mod config;
pub mod errors;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod resource;
pub mod scope;
pub mod service;
pub mod store;
pub mod tenant;

pub use access::{AccessController, MutationAction, MutationGrant, RoleChangeGrant, RoleChangeState};
pub use app::CrmApp;
pub use config::{CrmConfig, CrmConfigSnapshot};
pub use errors::{kind_of, CrmError, CrmResult, ErrorKind, PolicyResult};
pub use predicate::{FilterClause, Predicate, RowLookup, ScopeClause, ScopePredicate};
pub use query::{AdditionalFilters, Pagination, QueryConfig, ResourceQueryBuilder, ScopedQuery, Sort, SortOrder};
pub use registry::ServiceRegistry;
pub use resource::{Ownership, Relation, ResourceKind};
pub use scope::TenantScopeResolver;
pub use service::{Page, ResourceService, ScopedService, ServiceCapabilities, ServiceMethodKind};
pub use store::{MemoryStore, RecordScope, ScopedStore, UserRecord};
pub use tenant::{OrganizationId, Principal, Role, UserId};
