use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use crm_auth::{JwtAuthenticator, JwtOptions};
use crm_axum::axum;
use crm_core::{CrmApp, CrmConfig, MemoryStore, Principal, ResourceKind};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

struct Fixture {
    store: Arc<MemoryStore>,
    router: axum::Router,
    jwt: JwtAuthenticator,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(
            ResourceKind::Users,
            vec![
                json!({ "id": "user-agent", "organizationId": "org-123", "role": "USER" }),
                json!({ "id": "user-admin", "organizationId": "org-123", "role": "ADMIN" }),
                json!({ "id": "admin-1", "organizationId": "org-123", "role": "ADMIN" }),
                json!({ "id": "xyz-agent", "organizationId": "org-xyz", "role": "USER" }),
            ],
        )
        .unwrap();
    store
        .seed(
            ResourceKind::Leads,
            vec![
                json!({ "id": "L1", "organizationId": "org-123", "assignedToId": "user-agent", "createdAt": "2024-02-01T00:00:00Z" }),
                json!({ "id": "L2", "organizationId": "org-123", "assignedToId": null, "createdAt": "2024-01-01T00:00:00Z" }),
                json!({ "id": "LX", "organizationId": "org-xyz", "assignedToId": "xyz-agent", "createdAt": "2024-03-01T00:00:00Z" }),
            ],
        )
        .unwrap();

    let jwt = JwtAuthenticator::new(JwtOptions::default().with_secret("rest-test-secret")).unwrap();
    let app = CrmApp::new(store.clone(), &CrmConfig::new());
    let router = axum(app, Arc::new(jwt.clone())).router;
    Fixture { store, router, jwt }
}

impl Fixture {
    fn bearer(&self, principal: &Principal) -> String {
        format!("Bearer {}", self.jwt.sign_access_token(principal, None).unwrap())
    }

    async fn send(&self, method: &str, uri: &str, principal: Option<&Principal>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(p) = principal {
            req = req.header("authorization", self.bearer(p));
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

fn ids(page: &Value) -> Vec<&str> {
    page["rows"].as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn missing_token_is_401_with_request_id() {
    let fx = fixture();
    let res = fx
        .router
        .clone()
        .oneshot(Request::builder().uri("/leads").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get("x-request-id").is_some());
    assert_eq!(res.headers().get("www-authenticate").unwrap(), "Bearer");
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let fx = fixture();
    let provided = HeaderValue::from_static("req-test-123");
    let res = fx
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/leads")
                .header("x-request-id", provided.clone())
                .header("authorization", fx.bearer(&Principal::admin("org-123", "user-admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-request-id"), Some(&provided));
}

#[tokio::test]
async fn garbage_token_is_401() {
    let fx = fixture();
    let res = fx
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/leads")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&res.into_body().collect().await.unwrap().to_bytes()).unwrap();
    assert_eq!(body["name"], "NotAuthenticated");
    assert_eq!(body["message"], "Invalid access token");
}

#[tokio::test]
async fn user_lists_own_leads_and_admin_lists_all() {
    let fx = fixture();
    let (status, page) = fx.send("GET", "/leads", Some(&Principal::user("org-123", "user-agent")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), vec!["L1"]);

    let (_, page) = fx.send("GET", "/leads", Some(&Principal::admin("org-123", "user-admin")), None).await;
    assert_eq!(ids(&page), vec!["L1", "L2"]);
    assert_eq!(page["total"], 2);
}

#[tokio::test]
async fn foreign_lead_is_404() {
    let fx = fixture();
    let (status, body) = fx.send("GET", "/leads/LX", Some(&Principal::admin("org-123", "user-admin")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["name"], "NotFound");
    assert_eq!(body["className"], "not-found");
}

#[tokio::test]
async fn self_role_change_is_403() {
    let fx = fixture();
    let (status, body) = fx
        .send(
            "PATCH",
            "/users/admin-1/role",
            Some(&Principal::admin("org-123", "admin-1")),
            Some(json!({ "role": "USER" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);
    assert_eq!(fx.store.raw(ResourceKind::Users, "admin-1").unwrap()["role"], "ADMIN");
}

#[tokio::test]
async fn role_change_with_unknown_role_is_400() {
    let fx = fixture();
    let (status, body) = fx
        .send(
            "PATCH",
            "/users/user-agent/role",
            Some(&Principal::admin("org-123", "admin-1")),
            Some(json!({ "role": "owner" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"].get("role").is_some());
}

#[tokio::test]
async fn admin_promotes_a_colleague() {
    let fx = fixture();
    let (status, body) = fx
        .send(
            "PATCH",
            "/users/user-agent/role",
            Some(&Principal::admin("org-123", "admin-1")),
            Some(json!({ "role": "manager" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "user-agent", "organizationId": "org-123", "role": "MANAGER" }));
}

#[tokio::test]
async fn injected_organization_is_ignored() {
    let fx = fixture();
    let (status, page) = fx
        .send(
            "GET",
            "/leads?organizationId=org-999",
            Some(&Principal::admin("org-123", "user-admin")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), vec!["L1", "L2"]);
}

#[tokio::test]
async fn unknown_filter_and_bad_paging_are_400() {
    let fx = fixture();
    let admin = Principal::admin("org-123", "user-admin");

    let (status, body) = fx.send("GET", "/leads?colour=red", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"].get("colour").is_some());

    let (status, _) = fx.send("GET", "/leads?limit=ten", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_resource_is_404() {
    let fx = fixture();
    let (status, _) = fx.send("GET", "/invoices", Some(&Principal::admin("org-123", "user-admin")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let fx = fixture();
    let (status, body) = fx
        .send("PUT", "/leads/L1", Some(&Principal::admin("org-123", "user-admin")), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["name"], "MethodNotAllowed");
}

#[tokio::test]
async fn user_creates_then_deletes_own_task() {
    let fx = fixture();
    let agent = Principal::user("org-123", "user-agent");

    let (status, row) = fx
        .send("POST", "/tasks", Some(&agent), Some(json!({ "title": "Follow up", "organizationId": "org-xyz" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(row["organizationId"], "org-123");
    assert_eq!(row["assignedToId"], "user-agent");

    let id = row["id"].as_str().unwrap();
    let (status, _) = fx.send("DELETE", &format!("/tasks/{id}"), Some(&agent), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fx.store.raw(ResourceKind::Tasks, id).is_none());
}

#[tokio::test]
async fn user_cannot_patch_unassigned_lead() {
    let fx = fixture();
    let (status, _) = fx
        .send(
            "PATCH",
            "/leads/L2",
            Some(&Principal::user("org-123", "user-agent")),
            Some(json!({ "status": "WON" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let fx = fixture();
    let res = fx
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/leads")
                .header("authorization", fx.bearer(&Principal::admin("org-123", "user-admin")))
                .header("content-type", "application/json")
                .body(Body::from("{\"name\":\"x\""))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn corrupted_owner_is_500_without_details() {
    let fx = fixture();
    fx.store
        .seed(
            ResourceKind::Leads,
            vec![json!({ "id": "L9", "organizationId": "org-123", "assignedToId": "xyz-agent" })],
        )
        .unwrap();

    let (status, body) = fx
        .send("DELETE", "/leads/L9", Some(&Principal::admin("org-123", "user-admin")), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
    assert!(!body.to_string().contains("xyz-agent"));
    assert!(fx.store.raw(ResourceKind::Leads, "L9").is_some());
}
