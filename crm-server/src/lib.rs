use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use crm_auth::{JwtAuthenticator, JwtOptions};
use crm_axum::AxumApp;
use crm_core::{CrmApp, CrmConfig, MemoryStore, ResourceKind};
use serde_json::Value;

/// Load rows into the store from a JSON document keyed by resource path:
///
/// ```json
/// { "users": [{ "id": "u1", "organizationId": "org-1", "role": "ADMIN" }], "leads": [] }
/// ```
pub fn seed_store(store: &MemoryStore, doc: &Value) -> Result<usize> {
    let tables = doc
        .as_object()
        .context("seed document must be a JSON object keyed by resource")?;

    let mut loaded = 0;
    for (name, rows) in tables {
        let kind: ResourceKind = name.parse().map_err(|e: crm_core::CrmError| e.into_anyhow())?;
        let rows = rows
            .as_array()
            .with_context(|| format!("seed rows for '{name}' must be an array"))?;
        loaded += rows.len();
        store.seed(kind, rows.iter().cloned())?;
    }
    Ok(loaded)
}

/// Build the server from configuration.
///
/// Keys: `auth.*` (see [`JwtOptions::from_snapshot`]), `paginate.default`,
/// `paginate.max`, and `seed.path` for an optional JSON seed file.
pub fn build(config: &CrmConfig) -> Result<AxumApp> {
    let snapshot = config.snapshot();

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = snapshot.get("seed.path") {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed file {path}"))?;
        let doc: Value = serde_json::from_str(&raw).with_context(|| format!("parsing seed file {path}"))?;
        let rows = seed_store(&store, &doc)?;
        tracing::info!(%path, rows, "seeded in-memory store");
    }

    let jwt = JwtAuthenticator::new(JwtOptions::from_snapshot(&snapshot)?)?;
    let app = CrmApp::new(store, config);

    let health = Router::new().route("/health", get(|| async { "ok" }));
    Ok(AxumApp::new(app, Arc::new(jwt)).merge(health))
}

/// `http.host:http.port`, defaulting to `127.0.0.1:3030`.
pub fn listen_addr(config: &CrmConfig) -> String {
    let host = config.get("http.host").unwrap_or("127.0.0.1");
    let port = config.get("http.port").unwrap_or("3030");
    format!("{host}:{port}")
}
