use proptest::prelude::*;
use serde_json::{json, Value};

use crm_core::query::canonical_key;
use crm_core::resource::ORGANIZATION_FIELD;
use crm_core::{AdditionalFilters, Principal, QueryConfig, ResourceKind, ResourceQueryBuilder, Role};

const ORGS: [&str; 3] = ["org-1", "org-2", "org-3"];
const USERS: [&str; 3] = ["u1", "u2", "u3"];

fn tenant_kind() -> impl Strategy<Value = ResourceKind> {
    prop::sample::select(
        ResourceKind::ALL
            .into_iter()
            .filter(|k| k.is_tenant_scoped())
            .collect::<Vec<_>>(),
    )
}

fn role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL.to_vec())
}

fn principal() -> impl Strategy<Value = Principal> {
    (role(), prop::sample::select(ORGS.to_vec()), prop::sample::select(USERS.to_vec()))
        .prop_map(|(role, org, user)| Principal::new(role, org, user))
}

/// Rows spread over every org, owned by random users (or nobody), written
/// into every owner column any kind uses.
fn rows() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        (
            prop::sample::select(ORGS.to_vec()),
            prop::option::of(prop::sample::select(USERS.to_vec())),
            prop::sample::select(vec!["NEW", "WON", "LOST"]),
        ),
        0..40,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (org, owner, status))| {
                json!({
                    "id": format!("r{i}"),
                    "organizationId": org,
                    "assignedToId": owner,
                    "createdById": owner,
                    "userId": owner,
                    "authorId": owner,
                    "status": status,
                    "name": format!("row {i}"),
                })
            })
            .collect()
    })
}

/// Keys that try to reach another tenant or another owner.
fn hostile_filters() -> impl Strategy<Value = AdditionalFilters> {
    prop::collection::btree_map(
        prop::sample::select(vec![
            "organizationId",
            "organization_id",
            "ORGANIZATION-ID",
            "assignedToId",
            "assigned_to_id",
            "createdById",
            "userId",
            "user_id",
            "authorId",
        ])
        .prop_map(str::to_string),
        prop::sample::select(ORGS.iter().chain(USERS.iter()).copied().collect::<Vec<_>>()).prop_map(str::to_string),
        0..5,
    )
}

/// Keep only the keys that collide with this kind's scope columns; the rest
/// would be rejected as unknown filters.
fn aimed_at(kind: ResourceKind, filters: AdditionalFilters) -> AdditionalFilters {
    let scope: Vec<String> = std::iter::once(ORGANIZATION_FIELD)
        .chain(kind.owner_field())
        .map(canonical_key)
        .collect();
    filters
        .into_iter()
        .filter(|(k, _)| scope.contains(&canonical_key(k)))
        .collect()
}

fn visible<'a>(builder: &ResourceQueryBuilder, p: &Principal, kind: ResourceKind, rows: &'a [Value], f: &AdditionalFilters) -> Vec<&'a str> {
    let query = builder.build(p, kind, f).unwrap();
    rows.iter()
        .filter(|r| query.predicate.matches(r))
        .map(|r| r["id"].as_str().unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// No row of another organization is ever matched, and USER only
    /// matches rows it owns on owned kinds.
    #[test]
    fn scoped_queries_never_leave_the_tenant(
        p in principal(),
        kind in tenant_kind(),
        rows in rows(),
        filters in hostile_filters(),
    ) {
        let builder = ResourceQueryBuilder::new(QueryConfig::default());
        let query = builder.build(&p, kind, &aimed_at(kind, filters)).unwrap();

        for row in rows.iter().filter(|r| query.predicate.matches(r)) {
            prop_assert_eq!(row["organizationId"].as_str(), Some(p.organization_id.as_str()));
            if let (Role::User, Some(field)) = (p.role, kind.owner_field()) {
                prop_assert_eq!(row[field].as_str(), Some(p.user_id.as_str()));
            }
        }
    }

    /// Scope-colliding keys are dropped, so they cannot change the result.
    #[test]
    fn hostile_keys_change_nothing(
        p in principal(),
        kind in tenant_kind(),
        rows in rows(),
        filters in hostile_filters(),
    ) {
        let builder = ResourceQueryBuilder::new(QueryConfig::default());
        let baseline = visible(&builder, &p, kind, &rows, &AdditionalFilters::new());
        let attacked = visible(&builder, &p, kind, &rows, &aimed_at(kind, filters));
        prop_assert_eq!(baseline, attacked);
    }

    /// Legitimate filters only narrow.
    #[test]
    fn filters_only_narrow(
        p in principal(),
        rows in rows(),
        status in prop::sample::select(vec!["NEW", "WON", "LOST"]),
    ) {
        let builder = ResourceQueryBuilder::new(QueryConfig::default());
        let all = visible(&builder, &p, ResourceKind::Leads, &rows, &AdditionalFilters::new());
        let narrowed = visible(
            &builder,
            &p,
            ResourceKind::Leads,
            &rows,
            &[("status".to_string(), status.to_string())].into_iter().collect(),
        );
        prop_assert!(narrowed.iter().all(|id| all.contains(id)));
    }

    /// Same inputs, same predicate, same rendered `where`.
    #[test]
    fn resolution_is_deterministic(p in principal(), kind in tenant_kind()) {
        let builder = ResourceQueryBuilder::new(QueryConfig::default());
        let a = builder.build(&p, kind, &AdditionalFilters::new()).unwrap();
        let b = builder.build(&p.clone(), kind, &AdditionalFilters::new()).unwrap();
        prop_assert_eq!(a.predicate.to_where(), b.predicate.to_where());
        prop_assert_eq!(a, b);
    }
}
