use std::sync::Arc;

use crm_auth::Authenticator;
use crm_core::CrmApp;

/// Shared by every handler. Both fields are cheap to clone.
#[derive(Clone)]
pub struct CrmAxumState {
    pub app: CrmApp,
    pub auth: Arc<dyn Authenticator>,
}

impl CrmAxumState {
    pub fn new(app: CrmApp, auth: Arc<dyn Authenticator>) -> Self {
        Self { app, auth }
    }
}
