use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use crm_auth::Authenticator;
use crm_core::CrmApp;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::rest;
use crate::CrmAxumState;

/// The CRM application behind an axum router with tracing and request ids.
#[derive(Clone)]
pub struct AxumApp {
    pub app: CrmApp,
    pub router: Router<()>,
    routes: Router<()>,
}

fn layered(routes: Router<()>) -> Router<()> {
    routes.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                tracing::info_span!(
                    "http",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

impl AxumApp {
    pub fn new(app: CrmApp, auth: Arc<dyn Authenticator>) -> Self {
        let state = CrmAxumState::new(app.clone(), auth);
        let routes = rest::router(state);

        Self {
            app,
            router: layered(routes.clone()),
            routes,
        }
    }

    /// Mount another router next to the REST routes, e.g. health checks.
    /// The merged routes get the same request-id and trace layers.
    pub fn merge(mut self, router: Router<()>) -> Self {
        self.routes = self.routes.merge(router);
        self.router = layered(self.routes.clone());
        self
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?listener.local_addr().ok(), "listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

pub fn axum(app: CrmApp, auth: Arc<dyn Authenticator>) -> AxumApp {
    AxumApp::new(app, auth)
}
