//! Named services for JSON charts.

use harel_core::{service_fn, ServiceError, ServiceFn, ServiceLookup, ServiceRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

/// Maps the `src` names used in chart `invoke` entries to implementations.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceFn>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async function under `name`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        self.services.insert(name.into(), service_fn(f));
        self
    }

    pub fn register_fn(&mut self, name: impl Into<String>, f: ServiceFn) -> &mut Self {
        self.services.insert(name.into(), f);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ServiceLookup for ServiceRegistry {
    fn lookup(&self, name: &str) -> Option<ServiceFn> {
        self.services.get(name).cloned()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
