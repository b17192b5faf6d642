//! Topology events and the listener registry
//!
//! Listeners are held in an immutable `Arc<Vec<_>>` snapshot. Mutation swaps
//! in a new vector under a write lock; notification clones the current `Arc`
//! and iterates it without holding any lock, so add/remove during delivery
//! never disturbs an iteration in progress.

use std::sync::Arc;
use parking_lot::RwLock;
use crate::types::ClusterNode;

/// Kind of topology transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEventType {
    Join,
    Depart,
}

/// A membership transition delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEvent {
    event_type: ClusterEventType,
    nodes: Vec<ClusterNode>,
}

impl ClusterEvent {
    pub fn join(node: ClusterNode) -> Self {
        Self {
            event_type: ClusterEventType::Join,
            nodes: vec![node],
        }
    }

    pub fn depart(node: ClusterNode) -> Self {
        Self {
            event_type: ClusterEventType::Depart,
            nodes: vec![node],
        }
    }

    pub fn event_type(&self) -> ClusterEventType {
        self.event_type
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }
}

/// Receives topology events
///
/// Called on transport delivery threads; implementations must not block for
/// long.
pub trait ClusterEventListener: Send + Sync {
    fn process_cluster_event(&self, event: &ClusterEvent);
}

/// Logs every event, registered when debugging is enabled
#[derive(Debug, Default)]
pub struct DebuggingClusterEventListener;

impl ClusterEventListener for DebuggingClusterEventListener {
    fn process_cluster_event(&self, event: &ClusterEvent) {
        for node in event.nodes() {
            tracing::info!(event = ?event.event_type(), node = %node, "cluster event");
        }
    }
}

#[derive(Default)]
struct Listeners {
    builtin: Vec<Arc<dyn ClusterEventListener>>,
    registered: Vec<Arc<dyn ClusterEventListener>>,
    snapshot: Arc<Vec<Arc<dyn ClusterEventListener>>>,
}

impl Listeners {
    fn rebuild(&mut self) {
        let mut all = Vec::with_capacity(self.builtin.len() + self.registered.len());
        all.extend(self.builtin.iter().cloned());
        all.extend(self.registered.iter().cloned());
        self.snapshot = Arc::new(all);
    }
}

/// Thread-safe set of topology listeners
///
/// A disabled registry accepts every mutation and ignores it.
pub struct ListenerRegistry {
    listeners: RwLock<Listeners>,
    enabled: bool,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Listeners::default()),
            enabled: true,
        }
    }

    /// A permanently empty registry
    pub fn disabled() -> Self {
        Self {
            listeners: RwLock::new(Listeners::default()),
            enabled: false,
        }
    }

    /// Register a listener that survives [`set`](Self::set) and is only
    /// dropped by [`clear`](Self::clear)
    pub fn add_builtin(&self, listener: Arc<dyn ClusterEventListener>) {
        if !self.enabled {
            return;
        }
        let mut listeners = self.listeners.write();
        listeners.builtin.push(listener);
        listeners.rebuild();
    }

    /// Add a listener; adding the same listener twice is a no-op
    pub fn add(&self, listener: Arc<dyn ClusterEventListener>) {
        if !self.enabled {
            return;
        }
        let mut listeners = self.listeners.write();
        if listeners.registered.iter().any(|existing| same_listener(existing, &listener)) {
            return;
        }
        listeners.registered.push(listener);
        listeners.rebuild();
    }

    pub fn remove(&self, listener: &Arc<dyn ClusterEventListener>) {
        if !self.enabled {
            return;
        }
        let mut listeners = self.listeners.write();
        let before = listeners.registered.len();
        listeners.registered.retain(|existing| !same_listener(existing, listener));
        if listeners.registered.len() != before {
            listeners.rebuild();
        }
    }

    /// Replace every registered listener; built-in listeners are kept
    pub fn set(&self, replacement: Vec<Arc<dyn ClusterEventListener>>) {
        if !self.enabled {
            return;
        }
        let mut listeners = self.listeners.write();
        listeners.registered.clear();
        for listener in replacement {
            if !listeners.registered.iter().any(|existing| same_listener(existing, &listener)) {
                listeners.registered.push(listener);
            }
        }
        listeners.rebuild();
    }

    /// Drop every listener, built-ins included
    pub fn clear(&self) {
        let mut listeners = self.listeners.write();
        listeners.builtin.clear();
        listeners.registered.clear();
        listeners.rebuild();
    }

    /// Current listeners, built-ins first
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn ClusterEventListener>>> {
        Arc::clone(&self.listeners.read().snapshot)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener in the current snapshot
    pub fn notify(&self, event: &ClusterEvent) {
        let snapshot = self.snapshot();
        for listener in snapshot.iter() {
            listener.process_cluster_event(event);
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("enabled", &self.enabled)
            .field("listeners", &self.len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn ClusterEventListener>, b: &Arc<dyn ClusterEventListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
