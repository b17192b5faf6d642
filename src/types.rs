//! Core identity types for the cluster executor
//!
//! Nodes are known by two handles: a stable [`NodeId`] chosen by the node
//! itself, and a transport-level [`Address`] handed out by the group
//! transport when the node connects. [`ClusterNode`] is the record peers
//! exchange so that an address can be mapped back to a node.

use std::net::SocketAddr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transport-level identity of a connected group member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub Uuid);

impl Address {
    /// Generate a new random address
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token of a single dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster member as seen by its peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Stable node identifier
    node_id: NodeId,
    /// Address the node serves on
    socket_address: SocketAddr,
}

impl ClusterNode {
    pub fn new(node_id: NodeId, socket_address: SocketAddr) -> Self {
        Self { node_id, socket_address }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn socket_address(&self) -> SocketAddr {
        self.socket_address
    }
}

impl std::fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.node_id, self.socket_address)
    }
}
