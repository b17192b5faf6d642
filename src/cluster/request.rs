//! Cluster request model

use serde::{Deserialize, Serialize};
use crate::cluster::invoker::MethodHandler;
use crate::types::{NodeId, RequestId};

/// How the target set of a request is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    /// Every member of the dispatch-time view
    Multicast,
    /// The explicitly named nodes
    Unicast,
}

/// What a request carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A method to run on each target
    Invocation(MethodHandler),
    /// Anything else; not invocable
    Opaque(serde_json::Value),
}

impl From<MethodHandler> for Payload {
    fn from(handler: MethodHandler) -> Self {
        Payload::Invocation(handler)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Opaque(serde_json::Value::String(value.to_string()))
    }
}

/// One cluster-wide invocation intent
///
/// The correlation id is assigned by the executor when the request is
/// dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    payload: Payload,
    mode: RequestMode,
    target_node_ids: Vec<NodeId>,
    fire_and_forget: bool,
    skip_local: bool,
}

impl ClusterRequest {
    /// Request for every member, local node included
    pub fn multicast(payload: impl Into<Payload>) -> Self {
        Self::multicast_skip_local(payload, false)
    }

    pub fn multicast_skip_local(payload: impl Into<Payload>, skip_local: bool) -> Self {
        Self {
            payload: payload.into(),
            mode: RequestMode::Multicast,
            target_node_ids: Vec::new(),
            fire_and_forget: false,
            skip_local,
        }
    }

    /// Request for the named nodes only
    pub fn unicast<I, N>(payload: impl Into<Payload>, targets: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let mut target_node_ids: Vec<NodeId> = Vec::new();
        for target in targets {
            let target = target.into();
            if !target_node_ids.contains(&target) {
                target_node_ids.push(target);
            }
        }

        Self {
            payload: payload.into(),
            mode: RequestMode::Unicast,
            target_node_ids,
            fire_and_forget: false,
            skip_local: false,
        }
    }

    pub fn with_fire_and_forget(mut self, fire_and_forget: bool) -> Self {
        self.fire_and_forget = fire_and_forget;
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn target_node_ids(&self) -> &[NodeId] {
        &self.target_node_ids
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.fire_and_forget
    }

    pub fn is_skip_local(&self) -> bool {
        self.skip_local
    }
}

/// A request stamped with its correlation id, as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedRequest {
    pub request_id: RequestId,
    pub request: ClusterRequest,
}
