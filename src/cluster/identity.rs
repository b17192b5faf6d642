//! Injected identity and id generation
//!
//! The executor never reaches for global state to learn who it is or to mint
//! request ids. Both come from these providers, passed in at construction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;
use crate::types::{ClusterNode, NodeId, RequestId};

/// Source of unique identifiers
pub trait IdGenerator: Send + Sync {
    /// Generate a fresh, never reused, string id
    fn generate(&self) -> String;

    /// Generate a fresh request correlation id
    fn request_id(&self) -> RequestId;
}

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn request_id(&self) -> RequestId {
        RequestId(Uuid::new_v4())
    }
}

/// Deterministic ids for tests: `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn request_id(&self) -> RequestId {
        RequestId(Uuid::from_u128(self.next.fetch_add(1, Ordering::Relaxed) as u128))
    }
}

/// Describes the local node
pub trait NodeIdentityProvider: Send + Sync {
    fn local_node(&self) -> ClusterNode;
}

/// A fixed identity
#[derive(Debug, Clone)]
pub struct StaticNodeIdentity {
    node: ClusterNode,
}

impl StaticNodeIdentity {
    pub fn new(node_id: impl Into<NodeId>, socket_address: SocketAddr) -> Self {
        Self {
            node: ClusterNode::new(node_id.into(), socket_address),
        }
    }

    /// Identity with an id drawn from `generator`
    pub fn generated(generator: &dyn IdGenerator, socket_address: SocketAddr) -> Self {
        Self::new(NodeId::new(generator.generate()), socket_address)
    }
}

impl NodeIdentityProvider for StaticNodeIdentity {
    fn local_node(&self) -> ClusterNode {
        self.node.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let generator = SequentialIdGenerator::new("node");
        assert_eq!(generator.generate(), "node-1");
        assert_eq!(generator.generate(), "node-2");
        assert_ne!(generator.request_id(), generator.request_id());
    }

    #[test]
    fn test_generated_identity() {
        let generator = SequentialIdGenerator::new("member");
        let identity = StaticNodeIdentity::generated(&generator, "10.0.0.1:9000".parse().unwrap());
        let node = identity.local_node();

        assert_eq!(node.node_id().as_str(), "member-1");
        assert_eq!(node.socket_address().port(), 9000);
    }
}
