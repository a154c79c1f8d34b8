use std::collections::HashMap;
use std::sync::Arc;

use crate::resource::ResourceKind;
use crate::service::ScopedService;

/// Maps resource kinds to their services, so any transport can dispatch by
/// path.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<ResourceKind, Arc<dyn ScopedService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a service under the kind it reports. Replaces any previous one.
    pub fn register(&mut self, service: Arc<dyn ScopedService>) {
        self.services.insert(service.kind(), service);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ScopedService>> {
        self.services.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.services.keys().copied()
    }
}
