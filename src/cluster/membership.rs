//! Cluster membership tracking
//!
//! Keeps the bijection between transport addresses and cluster nodes for the
//! current view and turns join/depart signals into [`ClusterEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::cluster::listener::{ClusterEvent, ListenerRegistry};
use crate::types::{Address, ClusterNode, NodeId};

#[derive(Debug, Default)]
struct MemberTable {
    /// Members in join order
    members: Vec<(Address, ClusterNode)>,
    by_address: HashMap<Address, ClusterNode>,
    by_node_id: HashMap<NodeId, Address>,
}

/// Live member set of the local view
#[derive(Debug)]
pub struct MembershipTracker {
    table: RwLock<MemberTable>,
    listeners: Arc<ListenerRegistry>,
    enabled: bool,
}

impl MembershipTracker {
    pub fn new(listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            table: RwLock::new(MemberTable::default()),
            listeners,
            enabled: true,
        }
    }

    /// A tracker whose member set is empty and frozen
    pub fn disabled() -> Self {
        Self {
            table: RwLock::new(MemberTable::default()),
            listeners: Arc::new(ListenerRegistry::disabled()),
            enabled: false,
        }
    }

    /// Record that `node` is reachable at `address`.
    ///
    /// Returns `true` and emits a JOIN event when the address was not yet
    /// mapped. A node that reappears under a new address first departs from
    /// its stale one, so listeners always see JOIN and DEPART alternate.
    pub fn on_join(&self, address: Address, node: ClusterNode) -> bool {
        if !self.enabled {
            return false;
        }

        let stale = {
            let mut table = self.table.write();
            if table.by_address.contains_key(&address) {
                return false;
            }

            let stale = match table.by_node_id.remove(node.node_id()) {
                Some(stale_address) => {
                    table.members.retain(|(member, _)| *member != stale_address);
                    table.by_address.remove(&stale_address)
                }
                None => None,
            };

            table.by_node_id.insert(node.node_id().clone(), address);
            table.by_address.insert(address, node.clone());
            table.members.push((address, node.clone()));
            stale
        };

        if let Some(stale) = stale {
            tracing::debug!(%address, node = %stale, "cluster member moved to a new address");
            self.listeners.notify(&ClusterEvent::depart(stale));
        }

        tracing::debug!(%address, node = %node, "cluster member joined");
        self.listeners.notify(&ClusterEvent::join(node));
        true
    }

    /// Remove the given addresses, emitting DEPART for each one that was a
    /// member. Unknown addresses are ignored.
    pub fn on_depart(&self, addresses: &[Address]) -> Vec<ClusterNode> {
        if !self.enabled {
            return Vec::new();
        }

        let departed: Vec<ClusterNode> = {
            let mut table = self.table.write();
            let mut departed = Vec::new();
            for address in addresses {
                if let Some(node) = table.by_address.remove(address) {
                    table.by_node_id.remove(node.node_id());
                    table.members.retain(|(member, _)| member != address);
                    departed.push(node);
                }
            }
            departed
        };

        for node in &departed {
            tracing::debug!(node = %node, "cluster member departed");
            self.listeners.notify(&ClusterEvent::depart(node.clone()));
        }

        departed
    }

    /// Point-in-time copy of the members, in join order
    pub fn list_members(&self) -> Vec<ClusterNode> {
        self.table.read().members.iter().map(|(_, node)| node.clone()).collect()
    }

    pub fn is_alive(&self, node_id: &NodeId) -> bool {
        self.table.read().by_node_id.contains_key(node_id)
    }

    pub fn address_of(&self, node_id: &NodeId) -> Option<Address> {
        self.table.read().by_node_id.get(node_id).copied()
    }

    pub fn node_of(&self, address: &Address) -> Option<ClusterNode> {
        self.table.read().by_address.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every member without emitting events
    pub fn clear(&self) {
        let mut table = self.table.write();
        table.members.clear();
        table.by_address.clear();
        table.by_node_id.clear();
    }
}
