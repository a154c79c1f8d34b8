use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::{Method, StatusCode, Uri},
    routing::{get, patch},
    Json, Router,
};
use crm_core::{AdditionalFilters, CrmError, Page, UserId, UserRecord};
use serde_json::{json, Value};

use crate::params::{resource_kind, Authenticated, RoleChangeBody};
use crate::{CrmAxumError, CrmAxumState};

type RestResult<T> = Result<T, CrmAxumError>;

fn map_json_rejection(rejection: JsonRejection) -> CrmAxumError {
    CrmError::bad_request("Failed to parse the request body as JSON")
        .with_errors(json!({ "_schema": [rejection.body_text()] }))
        .into()
}

fn map_query_rejection(rejection: QueryRejection) -> CrmAxumError {
    CrmError::bad_request("Failed to parse the query string")
        .with_errors(json!({ "_query": [rejection.body_text()] }))
        .into()
}

async fn list(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path(kind): Path<String>,
    filters: Result<Query<AdditionalFilters>, QueryRejection>,
) -> RestResult<Json<Page>> {
    let kind = resource_kind(&kind)?;
    let Query(filters) = filters.map_err(map_query_rejection)?;
    let page = state.app.list_scoped(&principal, kind, &filters).await?;
    Ok(Json(page))
}

async fn create(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path(kind): Path<String>,
    data: Result<Json<Value>, JsonRejection>,
) -> RestResult<(StatusCode, Json<Value>)> {
    let kind = resource_kind(&kind)?;
    let Json(data) = data.map_err(map_json_rejection)?;
    let row = state.app.create_scoped(&principal, kind, data).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_one(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path((kind, id)): Path<(String, String)>,
) -> RestResult<Json<Value>> {
    let kind = resource_kind(&kind)?;
    Ok(Json(state.app.get_scoped(&principal, kind, &id).await?))
}

async fn patch_one(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path((kind, id)): Path<(String, String)>,
    data: Result<Json<Value>, JsonRejection>,
) -> RestResult<Json<Value>> {
    let kind = resource_kind(&kind)?;
    let Json(data) = data.map_err(map_json_rejection)?;
    Ok(Json(state.app.update_scoped(&principal, kind, &id, data).await?))
}

async fn delete_one(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path((kind, id)): Path<(String, String)>,
) -> RestResult<Json<Value>> {
    let kind = resource_kind(&kind)?;
    Ok(Json(state.app.delete_scoped(&principal, kind, &id).await?))
}

async fn change_role(
    State(state): State<CrmAxumState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    body: Result<Json<RoleChangeBody>, JsonRejection>,
) -> RestResult<Json<UserRecord>> {
    let Json(body) = body.map_err(map_json_rejection)?;
    let role = body.role()?;
    let user = state.app.change_role(&principal, &UserId::new(id), role).await?;
    Ok(Json(user))
}

async fn not_found(uri: Uri) -> CrmAxumError {
    CrmError::not_found(format!("Page not found: {}", uri.path())).into()
}

async fn method_not_allowed(method: Method, uri: Uri) -> CrmAxumError {
    CrmError::method_not_allowed(format!("Method {method} is not allowed on {}", uri.path())).into()
}

/// REST routes for every resource kind plus the role endpoint.
///
/// | method | path | operation |
/// |---|---|---|
/// | GET | `/{kind}` | list, query string as filters |
/// | POST | `/{kind}` | create |
/// | GET | `/{kind}/{id}` | get |
/// | PATCH | `/{kind}/{id}` | update |
/// | DELETE | `/{kind}/{id}` | delete |
/// | PATCH | `/users/{id}/role` | change role |
pub fn router(state: CrmAxumState) -> Router<()> {
    Router::new()
        .route("/{kind}", get(list).post(create))
        .route("/{kind}/{id}", get(get_one).patch(patch_one).delete(delete_one))
        .route("/users/{id}/role", patch(change_role))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}
