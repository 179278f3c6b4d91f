//! Invoked service descriptors.
//!
//! A service is an async computation bound to the lifetime of the state
//! that invokes it. The core only describes services; starting, cancelling
//! and reporting them is the runtime's job.

use crate::error::ServiceError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a running service is handed.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Cancelled when the owning state is exited.
    pub token: CancellationToken,
    /// Static input declared with the invocation.
    pub input: Value,
}

pub type ServiceFuture = BoxFuture<'static, Result<Value, ServiceError>>;

/// Factory starting one run of a service.
pub type ServiceFn = Arc<dyn Fn(ServiceRequest) -> ServiceFuture + Send + Sync>;

/// Wraps an async function into a [`ServiceFn`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Resolves service names used in JSON charts.
pub trait ServiceLookup {
    fn lookup(&self, name: &str) -> Option<ServiceFn>;
}

impl ServiceLookup for HashMap<String, ServiceFn> {
    fn lookup(&self, name: &str) -> Option<ServiceFn> {
        self.get(name).cloned()
    }
}

/// Service as declared on a state node definition.
#[derive(Clone)]
pub struct ServiceDef {
    /// Optional user-assigned id. Generated from the node path otherwise.
    pub id: Option<String>,
    pub src: ServiceFn,
    pub input: Value,
}

impl ServiceDef {
    pub fn new(src: ServiceFn) -> Self {
        Self {
            id: None,
            src,
            input: Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("id", &self.id)
            .field("input", &self.input)
            .finish()
    }
}

/// Service attached to a built node, with its final id.
#[derive(Clone)]
pub struct Service {
    pub id: String,
    pub src: ServiceFn,
    pub input: Value,
}

impl Service {
    /// Starts one run of the service.
    pub fn invoke(&self, token: CancellationToken) -> ServiceFuture {
        (self.src)(ServiceRequest {
            token,
            input: self.input.clone(),
        })
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("input", &self.input)
            .finish()
    }
}
