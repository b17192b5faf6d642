//! Per-node outcomes and their aggregate

use std::collections::HashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::NodeFailure;
use crate::types::{ClusterNode, NodeId, RequestId};

/// One node's result for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNodeResponse {
    request_id: RequestId,
    node_id: NodeId,
    cluster_node: Option<ClusterNode>,
    result: Result<serde_json::Value, NodeFailure>,
}

impl ClusterNodeResponse {
    /// Response produced by `node` itself
    pub fn from_node(
        request_id: RequestId,
        node: ClusterNode,
        result: Result<serde_json::Value, NodeFailure>,
    ) -> Self {
        Self {
            request_id,
            node_id: node.node_id().clone(),
            cluster_node: Some(node),
            result,
        }
    }

    /// Failure recorded on behalf of a node that never answered
    pub fn failed_for(request_id: RequestId, node_id: NodeId, failure: NodeFailure) -> Self {
        Self {
            request_id,
            node_id,
            cluster_node: None,
            result: Err(failure),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn cluster_node(&self) -> Option<&ClusterNode> {
        self.cluster_node.as_ref()
    }

    pub fn result(&self) -> Result<&serde_json::Value, &NodeFailure> {
        self.result.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&NodeFailure> {
        self.result.as_ref().err()
    }

    /// Decode a successful result into `T`
    pub fn value_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.value().and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn into_result(self) -> Result<serde_json::Value, NodeFailure> {
        self.result
    }
}

/// All outcomes collected for one request, keyed by node id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterNodeResponses {
    responses: HashMap<NodeId, ClusterNodeResponse>,
}

impl ClusterNodeResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the outcome for the response's node
    pub fn insert(&mut self, response: ClusterNodeResponse) -> Option<ClusterNodeResponse> {
        self.responses.insert(response.node_id().clone(), response)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&ClusterNodeResponse> {
        self.responses.get(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.responses.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.responses.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterNodeResponse> {
        self.responses.values()
    }

    /// Responses that carry a failure
    pub fn failures(&self) -> impl Iterator<Item = &ClusterNodeResponse> {
        self.responses.values().filter(|response| !response.is_success())
    }
}
