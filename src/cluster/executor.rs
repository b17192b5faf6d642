//! Cluster request dispatcher
//!
//! [`ClusterExecutor`] is the entry point of the crate. It connects to the
//! group through a [`Transport`], tracks membership from view changes and
//! notify messages, dispatches requests to the local node and to peers, and
//! correlates their outcomes into a [`FutureClusterResponses`].
//!
//! A disabled executor accepts every call and does nothing: `execute` returns
//! `Ok(None)`, the member set stays empty and listener changes are ignored.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use crate::cluster::future::{FutureClusterResponses, PendingCalls, ResponseCollector};
use crate::cluster::identity::{IdGenerator, NodeIdentityProvider};
use crate::cluster::invoker::{LocalInvoker, MethodRegistry};
use crate::cluster::listener::{ClusterEventListener, DebuggingClusterEventListener, ListenerRegistry};
use crate::cluster::membership::MembershipTracker;
use crate::cluster::message::ClusterMessage;
use crate::cluster::request::{ClusterRequest, DispatchedRequest, RequestMode};
use crate::cluster::response::ClusterNodeResponse;
use crate::cluster::transport::{Destination, Transport, TransportReceiver};
use crate::cluster::worker_pool::WorkerPool;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult, NodeFailure, TransportError};
use crate::types::{Address, ClusterNode, NodeId, RequestId};

struct ExecutorInner {
    config: ClusterConfig,
    transport: Arc<dyn Transport>,
    id_generator: Arc<dyn IdGenerator>,
    local_node: ClusterNode,
    listeners: Arc<ListenerRegistry>,
    membership: MembershipTracker,
    invoker: LocalInvoker,
    pending: PendingCalls,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    local_address: RwLock<Option<Address>>,
    initialized: AtomicBool,
}

impl ExecutorInner {
    fn is_local(&self, address: Address) -> bool {
        *self.local_address.read() == Some(address)
    }

    fn send(&self, destination: Destination, message: &ClusterMessage) -> Result<(), TransportError> {
        let payload = message
            .encode()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.transport.send(destination, payload)
    }

    fn broadcast_notify(&self) {
        let notify = ClusterMessage::Notify(self.local_node.clone());
        if let Err(e) = self.send(Destination::Broadcast, &notify) {
            tracing::error!(error = %e, "Unable to send notify message");
        }
    }

    /// Store an outcome in `collector` and drop the pending entry once the
    /// call is resolved
    fn record(&self, collector: &ResponseCollector, response: ClusterNodeResponse) {
        let request_id = response.request_id();
        collector.record(response);
        self.pending.complete_if_resolved(&request_id);
    }

    fn handle_request(self: &Arc<Self>, from: Address, dispatched: DispatchedRequest) {
        if self.is_local(from) {
            // Local targets are served synchronously by the dispatching thread
            return;
        }

        let pool = match self.pool.lock().as_ref() {
            Some(pool) => Arc::clone(pool),
            None => {
                tracing::debug!(request_id = %dispatched.request_id, "dropping request, executor is not running");
                return;
            }
        };

        let inner = Arc::clone(self);
        let accepted = pool.execute(move || {
            let DispatchedRequest { request_id, request } = dispatched;
            let response = inner.invoker.invoke(request_id, request.payload());

            if request.is_fire_and_forget() {
                return;
            }
            if let Err(e) = inner.send(Destination::Member(from), &ClusterMessage::Response(response)) {
                tracing::error!(%request_id, error = %e, "Unable to send response");
            }
        });

        if !accepted {
            tracing::debug!("dropping request, worker pool is shut down");
        }
    }

    fn handle_response(&self, response: ClusterNodeResponse) {
        let request_id = response.request_id();
        if !self.pending.record(response) {
            tracing::debug!(%request_id, "response for unknown or expired request");
        }
    }
}

/// Inbound side of the executor, registered with the transport
struct InboundHandler {
    inner: Weak<ExecutorInner>,
}

impl TransportReceiver for InboundHandler {
    fn view_accepted(&self, joined: &[Address], departed: &[Address]) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        if !departed.is_empty() {
            inner.membership.on_depart(departed);
        }

        // Newcomers only learn existing members from their notify messages
        if joined.iter().any(|address| !inner.is_local(*address)) {
            inner.broadcast_notify();
        }
    }

    fn receive(&self, from: Address, payload: Bytes) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let message = match ClusterMessage::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%from, error = %e, "discarding undecodable cluster message");
                return;
            }
        };

        match message {
            ClusterMessage::Notify(node) => {
                inner.membership.on_join(from, node);
            }
            ClusterMessage::Request(dispatched) => inner.handle_request(from, dispatched),
            ClusterMessage::Response(response) => inner.handle_response(response),
        }
    }
}

/// Executes requests across the cluster
pub struct ClusterExecutor {
    inner: Arc<ExecutorInner>,
}

impl ClusterExecutor {
    pub fn new(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn NodeIdentityProvider>,
        id_generator: Arc<dyn IdGenerator>,
        registry: Arc<MethodRegistry>,
    ) -> Self {
        let local_node = identity.local_node();

        let (listeners, membership) = if config.enabled {
            let listeners = Arc::new(ListenerRegistry::new());
            if config.debug {
                listeners.add_builtin(Arc::new(DebuggingClusterEventListener));
            }
            let membership = MembershipTracker::new(Arc::clone(&listeners));
            (listeners, membership)
        } else {
            (Arc::new(ListenerRegistry::disabled()), MembershipTracker::disabled())
        };

        let inner = ExecutorInner {
            invoker: LocalInvoker::new(registry, local_node.clone()),
            config,
            transport,
            id_generator,
            local_node,
            listeners,
            membership,
            pending: PendingCalls::new(),
            pool: Mutex::new(None),
            local_address: RwLock::new(None),
            initialized: AtomicBool::new(false),
        };

        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Connect to the group and announce the local node.
    ///
    /// A no-op when clustering is disabled or the executor is already
    /// initialized.
    pub fn initialize(&self) -> ClusterResult<()> {
        let inner = &self.inner;
        if !inner.config.enabled || self.is_initialized() {
            return Ok(());
        }
        inner.config.validate()?;

        let pool = Arc::new(WorkerPool::new(inner.config.worker_threads)?);
        *inner.pool.lock() = Some(Arc::clone(&pool));

        let receiver: Arc<dyn TransportReceiver> = Arc::new(InboundHandler {
            inner: Arc::downgrade(inner),
        });

        let address = match inner.transport.connect(receiver) {
            Ok(address) => address,
            Err(e) => {
                tracing::error!(channel = %inner.config.channel_name, error = %e, "Unable to initialize");
                inner.pool.lock().take();
                pool.shutdown();
                return Err(ClusterError::InitializationFailed(e));
            }
        };

        *inner.local_address.write() = Some(address);
        inner.initialized.store(true, Ordering::SeqCst);
        inner.membership.on_join(address, inner.local_node.clone());
        inner.broadcast_notify();

        tracing::info!(
            channel = %inner.config.channel_name,
            node = %inner.local_node,
            %address,
            "cluster executor initialized"
        );
        Ok(())
    }

    /// Leave the group and release every resource. Safe to call repeatedly,
    /// and before or after a failed [`initialize`](Self::initialize).
    pub fn destroy(&self) {
        let inner = &self.inner;
        let was_initialized = inner.initialized.swap(false, Ordering::SeqCst);

        inner.transport.disconnect();
        inner.local_address.write().take();
        inner.listeners.clear();
        inner.membership.clear();

        let abandoned = inner.pending.drain();
        for collector in &abandoned {
            collector.abandon(&NodeFailure::ExecutorDestroyed);
        }
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "pending calls failed on destroy");
        }

        let pool = inner.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }

        if was_initialized {
            tracing::info!(node = %inner.local_node, "cluster executor destroyed");
        }
    }

    /// Dispatch `request`.
    ///
    /// Returns `Ok(None)` when clustering is disabled. Otherwise the handle
    /// resolves once every target node has reported; per-node failures are
    /// part of the result. Only a transport that refuses the send fails the
    /// call.
    pub fn execute(&self, request: ClusterRequest) -> ClusterResult<Option<FutureClusterResponses>> {
        let inner = &self.inner;
        if !inner.config.enabled {
            return Ok(None);
        }

        let mode = request.mode();
        let send_failure = |e: TransportError| match mode {
            RequestMode::Multicast => ClusterError::MulticastSendFailed(e),
            RequestMode::Unicast => ClusterError::UnicastSendFailed(e),
        };

        if !self.is_initialized() {
            let error = send_failure(TransportError::NotConnected);
            tracing::error!(error = %error, "executor is not connected");
            return Err(error);
        }

        if let Some(ttl) = inner.config.pending_call_ttl() {
            let purged = inner.pending.sweep_expired(ttl);
            if purged > 0 {
                tracing::debug!(purged, "expired pending calls purged");
            }
        }

        let request_id = inner.id_generator.request_id();
        let local_id = inner.local_node.node_id().clone();

        let targets: Vec<NodeId> = match mode {
            RequestMode::Multicast => inner
                .membership
                .list_members()
                .into_iter()
                .map(|node| node.node_id().clone())
                .filter(|node_id| !(request.is_skip_local() && *node_id == local_id))
                .collect(),
            RequestMode::Unicast => request.target_node_ids().to_vec(),
        };
        let expected: HashSet<NodeId> = targets.iter().cloned().collect();
        let invoke_locally = expected.contains(&local_id);

        let collector = if request.is_fire_and_forget() {
            Arc::new(ResponseCollector::detached(request_id, expected))
        } else {
            inner.pending.register(request_id, expected)
        };

        tracing::debug!(
            %request_id,
            mode = ?request.mode(),
            targets = targets.len(),
            fire_and_forget = request.is_fire_and_forget(),
            "dispatching cluster request"
        );

        let local_payload = invoke_locally.then(|| request.payload().clone());
        let message = ClusterMessage::Request(DispatchedRequest {
            request_id,
            request,
        });

        let sent = match mode {
            RequestMode::Multicast => inner.send(Destination::Broadcast, &message),
            RequestMode::Unicast => self.send_unicast(&targets, &local_id, &collector, &message),
        };

        if let Err(e) = sent {
            inner.pending.discard(&request_id);
            let error = send_failure(e);
            tracing::error!(%request_id, cause = %error_source(&error), "{}", error);
            return Err(error);
        }

        if let Some(payload) = local_payload {
            let response = inner.invoker.invoke(request_id, &payload);
            inner.record(&collector, response);
        }

        inner.pending.complete_if_resolved(&request_id);
        Ok(Some(FutureClusterResponses::new(collector)))
    }

    fn send_unicast(
        &self,
        targets: &[NodeId],
        local_id: &NodeId,
        collector: &ResponseCollector,
        message: &ClusterMessage,
    ) -> Result<(), TransportError> {
        let inner = &self.inner;
        let request_id = collector.request_id();

        for node_id in targets.iter().filter(|node_id| *node_id != local_id) {
            match inner.membership.address_of(node_id) {
                Some(address) => inner.send(Destination::Member(address), message)?,
                None => {
                    tracing::debug!(%request_id, node = %node_id, "unicast target is not a member");
                    let failure = NodeFailure::UnknownNode(node_id.clone());
                    inner.record(collector, ClusterNodeResponse::failed_for(request_id, node_id.clone(), failure));
                }
            }
        }
        Ok(())
    }

    /// Run a request on this node, on the calling thread
    pub fn execute_cluster_request(&self, dispatched: &DispatchedRequest) -> ClusterNodeResponse {
        self.inner
            .invoker
            .invoke(dispatched.request_id, dispatched.request.payload())
    }

    /// Current members, in join order
    pub fn list_members(&self) -> Vec<ClusterNode> {
        self.inner.membership.list_members()
    }

    /// The local node, `None` when clustering is disabled
    pub fn local_node(&self) -> Option<ClusterNode> {
        self.inner.config.enabled.then(|| self.inner.local_node.clone())
    }

    pub fn is_alive(&self, node_id: &NodeId) -> bool {
        self.inner.membership.is_alive(node_id)
    }

    pub fn add_listener(&self, listener: Arc<dyn ClusterEventListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ClusterEventListener>) {
        self.inner.listeners.remove(listener);
    }

    /// Replace all user listeners; built-in listeners are kept
    pub fn set_listeners(&self, listeners: Vec<Arc<dyn ClusterEventListener>>) {
        self.inner.listeners.set(listeners);
    }

    pub fn listeners(&self) -> Arc<Vec<Arc<dyn ClusterEventListener>>> {
        self.inner.listeners.snapshot()
    }

    pub fn pending_calls(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// Local request id generator, exposed for building direct requests
    pub fn next_request_id(&self) -> RequestId {
        self.inner.id_generator.request_id()
    }
}

fn error_source(error: &ClusterError) -> String {
    std::error::Error::source(error)
        .map(|source| source.to_string())
        .unwrap_or_default()
}

impl Drop for ClusterExecutor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ClusterExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterExecutor")
            .field("enabled", &self.inner.config.enabled)
            .field("initialized", &self.is_initialized())
            .field("local_node", &self.inner.local_node)
            .field("members", &self.inner.membership.len())
            .field("pending_calls", &self.inner.pending.len())
            .finish()
    }
}
