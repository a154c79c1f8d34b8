use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{RecordScope, ScopedStore, UserRecord};
use crate::errors::{CrmError, CrmResult};
use crate::predicate::{Predicate, RowLookup};
use crate::query::{ScopedQuery, SortOrder};
use crate::resource::ResourceKind;
use crate::tenant::{OrganizationId, Role, UserId};

type Table = BTreeMap<String, Value>;

/// In-memory backend for tests and development.
///
/// Each mutation runs under a single write lock, so the scope comparison and
/// the write are atomic with respect to other requests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<ResourceKind, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows as-is, bypassing every policy check. Rows without an `id`
    /// are rejected.
    pub fn seed<I>(&self, kind: ResourceKind, rows: I) -> CrmResult<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut tables = self.tables.write();
        let table = tables.entry(kind).or_default();
        for row in rows {
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CrmError::bad_request(format!("seed row for {kind} has no id")).into_anyhow())?
                .to_string();
            table.insert(id, row);
        }
        Ok(())
    }

    /// Raw row by id, no scoping. Meant for assertions in tests.
    pub fn raw(&self, kind: ResourceKind, id: &str) -> Option<Value> {
        self.tables.read().get(&kind).and_then(|t| t.get(id)).cloned()
    }

    pub fn len(&self, kind: ResourceKind) -> usize {
        self.tables.read().get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, kind: ResourceKind) -> bool {
        self.len(kind) == 0
    }
}

impl RowLookup for HashMap<ResourceKind, Table> {
    fn row(&self, kind: ResourceKind, id: &str) -> Option<&Value> {
        self.get(&kind).and_then(|t| t.get(id))
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        // nulls and missing columns sort last
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Greater,
        (_, Some(Value::Null) | None) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl ScopedStore for MemoryStore {
    async fn find(&self, query: &ScopedQuery) -> CrmResult<(Vec<Value>, usize)> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&query.kind) else {
            return Ok((Vec::new(), 0));
        };

        let mut rows: Vec<&Value> = table
            .values()
            .filter(|row| query.predicate.matches_in(row, &*tables))
            .collect();
        let total = rows.len();

        let field = query.sort.field;
        rows.sort_by(|a, b| {
            let ord = compare(a.get(field), b.get(field));
            let ord = match (query.sort.order, a.get(field), b.get(field)) {
                // keep nulls last in both directions
                (SortOrder::Desc, Some(x), Some(y)) if !x.is_null() && !y.is_null() => ord.reverse(),
                _ => ord,
            };
            ord.then_with(|| compare(a.get("id"), b.get("id")))
        });

        let page = rows
            .into_iter()
            .skip(query.pagination.offset)
            .take(query.pagination.limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get(&self, kind: ResourceKind, id: &str, predicate: &Predicate) -> CrmResult<Option<Value>> {
        let tables = self.tables.read();
        Ok(tables
            .row(kind, id)
            .filter(|row| predicate.matches_in(row, &*tables))
            .cloned())
    }

    async fn scope_of(&self, kind: ResourceKind, id: &str) -> CrmResult<Option<RecordScope>> {
        Ok(self
            .tables
            .read()
            .get(&kind)
            .and_then(|t| t.get(id))
            .map(|row| RecordScope::of(kind, row)))
    }

    async fn user(&self, id: &UserId) -> CrmResult<Option<UserRecord>> {
        Ok(self
            .tables
            .read()
            .get(&ResourceKind::Users)
            .and_then(|t| t.get(id.as_str()))
            .and_then(UserRecord::from_row))
    }

    async fn insert(&self, kind: ResourceKind, row: Map<String, Value>) -> CrmResult<Value> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CrmError::general_error("insert without id").into_anyhow())?
            .to_string();

        let mut tables = self.tables.write();
        let table = tables.entry(kind).or_default();
        if table.contains_key(&id) {
            return Err(CrmError::conflict(format!("{kind} '{id}' already exists")).into_anyhow());
        }
        let row = Value::Object(row);
        table.insert(id, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        expected: &RecordScope,
        patch: Map<String, Value>,
    ) -> CrmResult<Option<Value>> {
        let mut tables = self.tables.write();
        let Some(row) = tables.get_mut(&kind).and_then(|t| t.get_mut(id)) else {
            return Ok(None);
        };
        if &RecordScope::of(kind, row) != expected {
            return Ok(None);
        }
        if let Some(obj) = row.as_object_mut() {
            obj.extend(patch);
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, kind: ResourceKind, id: &str, expected: &RecordScope) -> CrmResult<Option<Value>> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&kind) else {
            return Ok(None);
        };
        let unchanged = table
            .get(id)
            .is_some_and(|row| &RecordScope::of(kind, row) == expected);
        Ok(if unchanged { table.remove(id) } else { None })
    }

    async fn set_role(
        &self,
        user_id: &UserId,
        organization_id: &OrganizationId,
        role: Role,
    ) -> CrmResult<Option<UserRecord>> {
        let mut tables = self.tables.write();
        let Some(row) = tables
            .get_mut(&ResourceKind::Users)
            .and_then(|t| t.get_mut(user_id.as_str()))
        else {
            return Ok(None);
        };
        match UserRecord::from_row(row) {
            Some(user) if &user.organization_id == organization_id => {
                row["role"] = Value::String(role.as_str().to_string());
                Ok(UserRecord::from_row(row))
            }
            _ => Ok(None),
        }
    }
}
