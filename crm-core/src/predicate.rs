//! Query predicates.
//!
//! A [`Predicate`] is the conjunction of the mandatory [`ScopePredicate`]
//! and the caller's [`FilterClause`]s. The two halves are kept apart so the
//! scope can never be rewritten by a filter. Predicates can be rendered as a
//! Prisma-style `where` document for an ORM collaborator, or evaluated
//! directly against JSON rows.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::resource::{Relation, ResourceKind, ORGANIZATION_FIELD};
use crate::tenant::{OrganizationId, UserId};

/// Read access to related rows while a predicate is evaluated.
pub trait RowLookup {
    fn row(&self, kind: ResourceKind, id: &str) -> Option<&Value>;
}

/// No related rows: every relation clause that needs one fails.
impl RowLookup for () {
    fn row(&self, _kind: ResourceKind, _id: &str) -> Option<&Value> {
        None
    }
}

/// One non-overridable clause of the tenant scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeClause {
    Organization(OrganizationId),
    Owner { field: &'static str, user_id: UserId },
    /// The related row is owned by `user_id`, or there is no related row.
    Related { relation: Relation, user_id: UserId },
}

impl ScopeClause {
    pub fn field(&self) -> &'static str {
        match self {
            ScopeClause::Organization(_) => ORGANIZATION_FIELD,
            ScopeClause::Owner { field, .. } => field,
            ScopeClause::Related { relation, .. } => relation.field,
        }
    }

    fn matches(&self, row: &Map<String, Value>, lookup: &dyn RowLookup) -> bool {
        match self {
            ScopeClause::Organization(org) => row.get(ORGANIZATION_FIELD).and_then(Value::as_str) == Some(org.as_str()),
            ScopeClause::Owner { field, user_id } => row.get(*field).and_then(Value::as_str) == Some(user_id.as_str()),
            ScopeClause::Related { relation, user_id } => match row.get(relation.field) {
                None | Some(Value::Null) => true,
                Some(Value::String(id)) => {
                    let (Some(owner), Some(related)) = (relation.kind.owner_field(), lookup.row(relation.kind, id)) else {
                        return false;
                    };
                    related.get(ORGANIZATION_FIELD) == row.get(ORGANIZATION_FIELD)
                        && related.get(owner).and_then(Value::as_str) == Some(user_id.as_str())
                }
                Some(_) => false,
            },
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ScopeClause::Organization(org) => json!({ ORGANIZATION_FIELD: org.as_str() }),
            ScopeClause::Owner { field, user_id } => json!({ *field: user_id.as_str() }),
            ScopeClause::Related { relation, user_id } => {
                let owner = relation.kind.owner_field().unwrap_or(ORGANIZATION_FIELD);
                json!({ "OR": [
                    { relation.name: { owner: user_id.as_str() } },
                    { relation.field: null },
                ] })
            }
        }
    }
}

/// The mandatory predicate for one principal and resource kind.
///
/// An empty scope means the kind is not tenant-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopePredicate {
    clauses: Vec<ScopeClause>,
}

impl ScopePredicate {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn organization(org: OrganizationId) -> Self {
        Self {
            clauses: vec![ScopeClause::Organization(org)],
        }
    }

    pub fn and_owner(mut self, field: &'static str, user_id: UserId) -> Self {
        self.clauses.push(ScopeClause::Owner { field, user_id });
        self
    }

    pub fn and_related(mut self, relation: Relation, user_id: UserId) -> Self {
        self.clauses.push(ScopeClause::Related { relation, user_id });
        self
    }

    pub fn clauses(&self) -> &[ScopeClause] {
        &self.clauses
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn organization_id(&self) -> Option<&OrganizationId> {
        self.clauses.iter().find_map(|c| match c {
            ScopeClause::Organization(org) => Some(org),
            _ => None,
        })
    }

    pub fn owner(&self) -> Option<(&'static str, &UserId)> {
        self.clauses.iter().find_map(|c| match c {
            ScopeClause::Owner { field, user_id } => Some((*field, user_id)),
            _ => None,
        })
    }

    /// Whether `field` is constrained by this scope.
    pub fn constrains(&self, field: &str) -> bool {
        self.clauses.iter().any(|c| c.field() == field)
    }

    /// Evaluate without related rows; relation clauses only pass rows that
    /// have no related id.
    pub fn matches(&self, row: &Value) -> bool {
        self.matches_in(row, &())
    }

    pub fn matches_in(&self, row: &Value, lookup: &dyn RowLookup) -> bool {
        match row.as_object() {
            Some(obj) => self.clauses.iter().all(|c| c.matches(obj, lookup)),
            None => false,
        }
    }

    pub fn to_json(&self) -> Vec<Value> {
        self.clauses.iter().map(ScopeClause::to_json).collect()
    }
}

/// A validated, caller-supplied filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Equals { field: &'static str, value: Value },
    Search { columns: &'static [&'static str], term: String },
    AtLeast { field: &'static str, bound: f64 },
    AtMost { field: &'static str, bound: f64 },
    After { field: &'static str, at: DateTime<Utc> },
    Before { field: &'static str, at: DateTime<Utc> },
}

impl FilterClause {
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            FilterClause::Equals { field, value } => row.get(*field) == Some(value),
            FilterClause::Search { columns, term } => {
                let needle = term.to_lowercase();
                columns.iter().any(|col| {
                    row.get(*col)
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                })
            }
            FilterClause::AtLeast { field, bound } => {
                row.get(*field).and_then(Value::as_f64).is_some_and(|v| v >= *bound)
            }
            FilterClause::AtMost { field, bound } => {
                row.get(*field).and_then(Value::as_f64).is_some_and(|v| v <= *bound)
            }
            FilterClause::After { field, at } => timestamp(row, field).is_some_and(|t| t >= *at),
            FilterClause::Before { field, at } => timestamp(row, field).is_some_and(|t| t <= *at),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterClause::Equals { field, value } => json!({ *field: value }),
            FilterClause::Search { columns, term } => {
                let any: Vec<Value> = columns
                    .iter()
                    .map(|col| json!({ *col: { "contains": term, "mode": "insensitive" } }))
                    .collect();
                json!({ "OR": any })
            }
            FilterClause::AtLeast { field, bound } => json!({ *field: { "gte": bound } }),
            FilterClause::AtMost { field, bound } => json!({ *field: { "lte": bound } }),
            FilterClause::After { field, at } => json!({ *field: { "gte": at.to_rfc3339() } }),
            FilterClause::Before { field, at } => json!({ *field: { "lte": at.to_rfc3339() } }),
        }
    }
}

fn timestamp(row: &Map<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    row.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Final predicate handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    scope: ScopePredicate,
    filters: Vec<FilterClause>,
}

impl Predicate {
    pub fn new(scope: ScopePredicate, filters: Vec<FilterClause>) -> Self {
        Self { scope, filters }
    }

    /// Scope only, no caller filters.
    pub fn scoped(scope: ScopePredicate) -> Self {
        Self::new(scope, Vec::new())
    }

    pub fn scope(&self) -> &ScopePredicate {
        &self.scope
    }

    pub fn filters(&self) -> &[FilterClause] {
        &self.filters
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.matches_in(row, &())
    }

    pub fn matches_in(&self, row: &Value, lookup: &dyn RowLookup) -> bool {
        let Some(obj) = row.as_object() else {
            return false;
        };
        self.scope.matches_in(row, lookup) && self.filters.iter().all(|f| f.matches(obj))
    }

    /// Prisma-style `where` document: `{"AND": [scope..., filters...]}`.
    pub fn to_where(&self) -> Value {
        let mut all = self.scope.to_json();
        all.extend(self.filters.iter().map(FilterClause::to_json));
        json!({ "AND": all })
    }
}
