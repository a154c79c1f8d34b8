//! Building scoped queries out of untrusted request filters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CrmConfigSnapshot;
use crate::errors::{CrmError, PolicyResult};
use crate::predicate::{FilterClause, Predicate};
use crate::resource::{FilterOp, FilterSpec, FilterValue, ResourceKind, ORGANIZATION_FIELD};
use crate::scope::TenantScopeResolver;
use crate::tenant::Principal;

/// Untrusted key → value pairs straight from the request (query string).
pub type AdditionalFilters = BTreeMap<String, String>;

/// Lowercase and strip `_`/`-`, so `organization_id` and `organizationId`
/// compare equal.
pub fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Pagination and sort limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

impl QueryConfig {
    /// Reads `paginate.default` and `paginate.max`, falling back to defaults.
    pub fn from_snapshot(cfg: &CrmConfigSnapshot) -> Self {
        let base = Self::default();
        let max_limit = cfg.get_usize("paginate.max").unwrap_or(base.max_limit).max(1);
        let default_limit = cfg
            .get_usize("paginate.default")
            .unwrap_or(base.default_limit)
            .clamp(1, max_limit);
        Self {
            default_limit,
            max_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: &'static str,
    pub order: SortOrder,
}

/// A predicate plus normalized paging, ready for the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    pub kind: ResourceKind,
    pub predicate: Predicate,
    pub pagination: Pagination,
    pub sort: Sort,
}

/// Merges the mandatory tenant scope with caller filters.
///
/// Caller input can only narrow the result: keys naming the organization or
/// the kind's owner column are dropped, unknown keys are rejected.
#[derive(Debug, Clone, Default)]
pub struct ResourceQueryBuilder {
    resolver: TenantScopeResolver,
    config: QueryConfig,
}

impl ResourceQueryBuilder {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            resolver: TenantScopeResolver::new(),
            config,
        }
    }

    pub fn config(&self) -> QueryConfig {
        self.config
    }

    pub fn resolver(&self) -> &TenantScopeResolver {
        &self.resolver
    }

    pub fn build(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        filters: &AdditionalFilters,
    ) -> PolicyResult<ScopedQuery> {
        let scope = self.resolver.resolve(principal, kind);

        let mandatory: Vec<String> = std::iter::once(ORGANIZATION_FIELD)
            .chain(kind.owner_field())
            .map(canonical_key)
            .collect();

        let mut clauses = Vec::new();
        let mut page = None;
        let mut limit = None;
        let mut offset = None;
        let mut sort_by = None;
        let mut sort_order = None;

        for (key, raw) in filters {
            let canon = canonical_key(key);

            if mandatory.contains(&canon) {
                tracing::warn!(
                    user_id = %principal.user_id,
                    organization_id = %principal.organization_id,
                    resource = %kind,
                    key = %key,
                    value = %raw,
                    "dropped scope-widening filter"
                );
                continue;
            }

            match canon.as_str() {
                "page" => page = Some(parse_count(key, raw)?),
                "limit" => limit = Some(parse_count(key, raw)?),
                "offset" => offset = Some(parse_count(key, raw)?),
                "sortby" => sort_by = Some(parse_sort_field(kind, key, raw)?),
                "sortorder" => sort_order = Some(parse_sort_order(key, raw)?),
                _ => {
                    let spec = kind
                        .filters()
                        .iter()
                        .find(|s| canonical_key(s.key) == canon)
                        .ok_or_else(|| {
                            CrmError::validation(key, format!("unknown filter for {kind}"))
                        })?;
                    if let Some(clause) = parse_clause(spec, key, raw)? {
                        clauses.push(clause);
                    }
                }
            }
        }

        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);
        let (page, offset) = match offset {
            Some(offset) => ((offset / limit).saturating_add(1), offset),
            None => {
                let page = page.unwrap_or(1).max(1);
                (page, (page - 1).saturating_mul(limit))
            }
        };

        let sort = Sort {
            field: sort_by.unwrap_or(kind.sort_fields()[0]),
            order: sort_order.unwrap_or(SortOrder::Desc),
        };

        Ok(ScopedQuery {
            kind,
            predicate: Predicate::new(scope, clauses),
            pagination: Pagination {
                page,
                limit,
                offset,
            },
            sort,
        })
    }
}

fn parse_count(key: &str, raw: &str) -> PolicyResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| CrmError::validation(key, format!("'{raw}' is not a non-negative integer")))
}

fn parse_sort_field(kind: ResourceKind, key: &str, raw: &str) -> PolicyResult<&'static str> {
    kind.sort_fields()
        .iter()
        .copied()
        .find(|f| *f == raw.trim())
        .ok_or_else(|| {
            CrmError::validation(
                key,
                format!("'{raw}' is not sortable; use one of {}", kind.sort_fields().join(", ")),
            )
        })
}

fn parse_sort_order(key: &str, raw: &str) -> PolicyResult<SortOrder> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "asc" => Ok(SortOrder::Asc),
        "desc" => Ok(SortOrder::Desc),
        _ => Err(CrmError::validation(key, "expected 'asc' or 'desc'")),
    }
}

/// Empty values are treated as "not supplied".
fn parse_clause(spec: &FilterSpec, key: &str, raw: &str) -> PolicyResult<Option<FilterClause>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let clause = match (spec.op, spec.value) {
        (FilterOp::Search(columns), _) => FilterClause::Search {
            columns,
            term: raw.to_string(),
        },
        (FilterOp::Equals, FilterValue::Enum(allowed)) => {
            let upper = raw.to_ascii_uppercase();
            if !allowed.contains(&upper.as_str()) {
                return Err(CrmError::validation(
                    key,
                    format!("'{raw}' is not one of {}", allowed.join(", ")),
                ));
            }
            FilterClause::Equals {
                field: spec.field,
                value: Value::String(upper),
            }
        }
        (FilterOp::Equals, FilterValue::Flag) => {
            let flag = raw
                .to_ascii_lowercase()
                .parse::<bool>()
                .map_err(|_| CrmError::validation(key, "expected 'true' or 'false'"))?;
            FilterClause::Equals {
                field: spec.field,
                value: Value::Bool(flag),
            }
        }
        (FilterOp::Equals, _) => FilterClause::Equals {
            field: spec.field,
            value: Value::String(raw.to_string()),
        },
        (FilterOp::AtLeast, _) => FilterClause::AtLeast {
            field: spec.field,
            bound: parse_number(key, raw)?,
        },
        (FilterOp::AtMost, _) => FilterClause::AtMost {
            field: spec.field,
            bound: parse_number(key, raw)?,
        },
        (FilterOp::After, _) => FilterClause::After {
            field: spec.field,
            at: parse_timestamp(key, raw)?,
        },
        (FilterOp::Before, _) => FilterClause::Before {
            field: spec.field,
            at: parse_timestamp(key, raw)?,
        },
    };
    Ok(Some(clause))
}

fn parse_number(key: &str, raw: &str) -> PolicyResult<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CrmError::validation(key, format!("'{raw}' is not a number")))
}

fn parse_timestamp(key: &str, raw: &str) -> PolicyResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CrmError::validation(key, format!("'{raw}' is not an RFC 3339 timestamp")))
}
