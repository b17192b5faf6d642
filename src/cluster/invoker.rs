//! Invocation descriptors and local execution
//!
//! A [`MethodHandler`] names a registered method by [`MethodKey`] and carries
//! its JSON arguments. The [`LocalInvoker`] resolves the key against a
//! [`MethodRegistry`], runs the method with an explicit
//! [`InvocationContext`], and turns every outcome, including panics and
//! non-serializable return values, into a [`ClusterNodeResponse`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::cluster::request::Payload;
use crate::cluster::response::ClusterNodeResponse;
use crate::error::NodeFailure;
use crate::types::{ClusterNode, RequestId};

/// Name of a registered method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    service: String,
    method: String,
}

impl MethodKey {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.service, self.method)
    }
}

/// Serializable description of a call: which method, with what arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodHandler {
    method_key: MethodKey,
    arguments: Vec<serde_json::Value>,
}

impl MethodHandler {
    pub fn new(method_key: MethodKey, arguments: Vec<serde_json::Value>) -> Self {
        Self { method_key, arguments }
    }

    /// Handler for a method without arguments
    pub fn without_arguments(method_key: MethodKey) -> Self {
        Self::new(method_key, Vec::new())
    }

    pub fn method_key(&self) -> &MethodKey {
        &self.method_key
    }

    pub fn arguments(&self) -> &[serde_json::Value] {
        &self.arguments
    }
}

/// Passed to every invoked method.
///
/// Code that must behave differently when it runs on behalf of the cluster
/// (for example, not re-broadcasting a change it is applying) checks
/// [`is_cluster_invocation`](Self::is_cluster_invocation).
#[derive(Debug, Clone)]
pub struct InvocationContext {
    cluster_invocation: bool,
    request_id: Option<RequestId>,
    local_node: Option<ClusterNode>,
}

impl InvocationContext {
    /// Context of a call dispatched by the cluster layer
    pub fn cluster(request_id: RequestId, local_node: ClusterNode) -> Self {
        Self {
            cluster_invocation: true,
            request_id: Some(request_id),
            local_node: Some(local_node),
        }
    }

    /// Context of an ordinary in-process call
    pub fn direct() -> Self {
        Self {
            cluster_invocation: false,
            request_id: None,
            local_node: None,
        }
    }

    pub fn is_cluster_invocation(&self) -> bool {
        self.cluster_invocation
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn local_node(&self) -> Option<&ClusterNode> {
        self.local_node.as_ref()
    }
}

/// A return value that may or may not survive serialization
pub trait TransportValue: Send {
    fn to_transport(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<T: Serialize + Send> TransportValue for T {
    fn to_transport(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

type Method = dyn Fn(&InvocationContext, &[serde_json::Value]) -> anyhow::Result<Box<dyn TransportValue>>
    + Send
    + Sync;

/// Decode argument `index` of a method call
pub fn argument<T: DeserializeOwned>(arguments: &[serde_json::Value], index: usize) -> anyhow::Result<T> {
    let value = arguments
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing argument {}", index))?;
    Ok(serde_json::from_value(value.clone())?)
}

/// Methods that may be invoked through the cluster
#[derive(Default)]
pub struct MethodRegistry {
    methods: DashMap<MethodKey, Arc<Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` under `key`, replacing any previous registration
    pub fn register<F, R>(&self, key: MethodKey, method: F)
    where
        F: Fn(&InvocationContext, &[serde_json::Value]) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize + Send + 'static,
    {
        let method: Arc<Method> = Arc::new(move |context: &InvocationContext, arguments: &[serde_json::Value]| {
            method(context, arguments).map(|value| Box::new(value) as Box<dyn TransportValue>)
        });
        self.methods.insert(key, method);
    }

    /// Register a method whose return value is produced as-is, without a
    /// `Serialize` bound
    pub fn register_raw<F>(&self, key: MethodKey, method: F)
    where
        F: Fn(&InvocationContext, &[serde_json::Value]) -> anyhow::Result<Box<dyn TransportValue>>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(key, Arc::new(method));
    }

    pub fn unregister(&self, key: &MethodKey) -> bool {
        self.methods.remove(key).is_some()
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn resolve(&self, key: &MethodKey) -> Option<Arc<Method>> {
        self.methods.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Run a handler in-process, outside the cluster layer
    pub fn invoke_direct(&self, handler: &MethodHandler) -> Result<serde_json::Value, NodeFailure> {
        run(self, &InvocationContext::direct(), handler)
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

fn run(
    registry: &MethodRegistry,
    context: &InvocationContext,
    handler: &MethodHandler,
) -> Result<serde_json::Value, NodeFailure> {
    let method = registry
        .resolve(handler.method_key())
        .ok_or_else(|| NodeFailure::UnresolvedMethod(handler.method_key().clone()))?;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| method(context, handler.arguments())));

    match outcome {
        Ok(Ok(value)) => value
            .to_transport()
            .map_err(|e| NodeFailure::NotTransportable { reason: e.to_string() }),
        Ok(Err(error)) => Err(NodeFailure::from_error(&error)),
        Err(panic) => Err(NodeFailure::InvocationFailed {
            message: panic_message(panic.as_ref()),
            causes: Vec::new(),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "method panicked".to_string()
    }
}

/// Executes request payloads on the current node
#[derive(Debug, Clone)]
pub struct LocalInvoker {
    registry: Arc<MethodRegistry>,
    local_node: ClusterNode,
}

impl LocalInvoker {
    pub fn new(registry: Arc<MethodRegistry>, local_node: ClusterNode) -> Self {
        Self { registry, local_node }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Run `payload` and capture its outcome. Never fails and never panics
    /// out of a user method.
    pub fn invoke(&self, request_id: RequestId, payload: &Payload) -> ClusterNodeResponse {
        let result = match payload {
            Payload::Invocation(handler) => {
                let context = InvocationContext::cluster(request_id, self.local_node.clone());
                run(&self.registry, &context, handler)
            }
            Payload::Opaque(_) => Err(NodeFailure::InvalidPayload),
        };

        if let Err(failure) = &result {
            tracing::debug!(%request_id, %failure, "local invocation failed");
        }

        ClusterNodeResponse::from_node(request_id, self.local_node.clone(), result)
    }
}
