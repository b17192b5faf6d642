//! Response correlation
//!
//! Every dispatched request gets a [`ResponseCollector`] that accumulates
//! per-node outcomes until each expected responder has reported. Callers wait
//! on it through a [`FutureClusterResponses`] handle. The process-wide
//! [`PendingCalls`] table routes inbound responses to their collector by
//! request id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use crate::cluster::response::{ClusterNodeResponse, ClusterNodeResponses};
use crate::error::{ClusterError, ClusterResult, NodeFailure};
use crate::types::{NodeId, RequestId};

#[derive(Debug, Default)]
struct CollectorState {
    responses: ClusterNodeResponses,
    resolved: bool,
}

/// Correlation state of one in-flight request
#[derive(Debug)]
pub struct ResponseCollector {
    request_id: RequestId,
    expected: HashSet<NodeId>,
    state: Mutex<CollectorState>,
    resolved_signal: Condvar,
    created_at: Instant,
    /// Never resolves; used for fire-and-forget handles
    detached: bool,
}

impl ResponseCollector {
    /// Collector that resolves once every node in `expected` has reported.
    /// An empty expected set resolves immediately.
    pub fn new(request_id: RequestId, expected: HashSet<NodeId>) -> Self {
        let resolved = expected.is_empty();
        Self {
            request_id,
            expected,
            state: Mutex::new(CollectorState {
                responses: ClusterNodeResponses::new(),
                resolved,
            }),
            resolved_signal: Condvar::new(),
            created_at: Instant::now(),
            detached: false,
        }
    }

    /// Collector that accepts responses but never resolves
    pub fn detached(request_id: RequestId, expected: HashSet<NodeId>) -> Self {
        Self {
            request_id,
            expected,
            state: Mutex::new(CollectorState::default()),
            resolved_signal: Condvar::new(),
            created_at: Instant::now(),
            detached: true,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn expected(&self) -> &HashSet<NodeId> {
        &self.expected
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Store `response`, overwriting any earlier one from the same node.
    ///
    /// Returns `true` only for the call that moved the collector to resolved.
    /// Responses from nodes outside the expected set are kept but never count
    /// toward resolution.
    pub fn record(&self, response: ClusterNodeResponse) -> bool {
        let mut state = self.state.lock();
        state.responses.insert(response);

        if state.resolved || self.detached {
            return false;
        }

        let complete = self.expected.iter().all(|node_id| state.responses.contains(node_id));
        if complete {
            state.resolved = true;
            self.resolved_signal.notify_all();
        }
        complete
    }

    /// Resolve the call with `failure` for every expected node that has not
    /// reported yet, waking all waiters.
    ///
    /// Returns `false` when the collector was already resolved or is detached.
    pub fn abandon(&self, failure: &NodeFailure) -> bool {
        let mut state = self.state.lock();
        if state.resolved || self.detached {
            return false;
        }

        for node_id in &self.expected {
            if !state.responses.contains(node_id) {
                state.responses.insert(ClusterNodeResponse::failed_for(
                    self.request_id,
                    node_id.clone(),
                    failure.clone(),
                ));
            }
        }
        state.resolved = true;
        self.resolved_signal.notify_all();
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.state.lock().resolved
    }

    /// Copy of whatever has been collected so far
    pub fn snapshot(&self) -> ClusterNodeResponses {
        self.state.lock().responses.clone()
    }

    fn wait(&self) -> ClusterNodeResponses {
        let mut state = self.state.lock();
        while !state.resolved {
            self.resolved_signal.wait(&mut state);
        }
        state.responses.clone()
    }

    fn wait_for(&self, timeout: Duration) -> ClusterResult<ClusterNodeResponses> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.resolved {
            if self.resolved_signal.wait_until(&mut state, deadline).timed_out() {
                if state.resolved {
                    break;
                }
                return Err(ClusterError::WaitTimeout {
                    request_id: self.request_id,
                    timeout,
                });
            }
        }
        Ok(state.responses.clone())
    }
}

/// Awaitable handle on the outcomes of one request
#[derive(Debug, Clone)]
pub struct FutureClusterResponses {
    collector: Arc<ResponseCollector>,
}

impl FutureClusterResponses {
    pub fn new(collector: Arc<ResponseCollector>) -> Self {
        Self { collector }
    }

    pub fn request_id(&self) -> RequestId {
        self.collector.request_id()
    }

    /// Node ids whose outcome this handle waits for
    pub fn expected_node_ids(&self) -> &HashSet<NodeId> {
        self.collector.expected()
    }

    /// Block until every expected node has reported
    pub fn get(&self) -> ClusterNodeResponses {
        self.collector.wait()
    }

    /// Block for at most `timeout`.
    ///
    /// Timing out leaves the collector untouched; it keeps accumulating and a
    /// later call may still succeed.
    pub fn get_timeout(&self, timeout: Duration) -> ClusterResult<ClusterNodeResponses> {
        self.collector.wait_for(timeout)
    }

    pub fn is_done(&self) -> bool {
        self.collector.is_resolved()
    }

    /// Outcomes collected so far, without waiting
    pub fn peek(&self) -> ClusterNodeResponses {
        self.collector.snapshot()
    }
}

/// Process-wide table of in-flight requests
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: DashMap<RequestId, Arc<ResponseCollector>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector for `request_id`; must happen before the request
    /// is sent
    pub fn register(&self, request_id: RequestId, expected: HashSet<NodeId>) -> Arc<ResponseCollector> {
        let collector = Arc::new(ResponseCollector::new(request_id, expected));
        self.calls.insert(request_id, Arc::clone(&collector));
        collector
    }

    /// Route a response to its collector. Resolved calls leave the table.
    ///
    /// Returns `false` when no call is pending under the response's id.
    pub fn record(&self, response: ClusterNodeResponse) -> bool {
        let request_id = response.request_id();
        let collector = match self.calls.get(&request_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return false,
        };

        if collector.record(response) {
            self.calls.remove(&request_id);
        }
        true
    }

    /// Complete bookkeeping for a call resolved outside [`record`](Self::record)
    pub fn complete_if_resolved(&self, request_id: &RequestId) {
        self.calls.remove_if(request_id, |_, collector| collector.is_resolved());
    }

    pub fn discard(&self, request_id: &RequestId) -> Option<Arc<ResponseCollector>> {
        self.calls.remove(request_id).map(|(_, collector)| collector)
    }

    pub fn get(&self, request_id: &RequestId) -> Option<Arc<ResponseCollector>> {
        self.calls.get(request_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop abandoned calls older than `ttl`; returns how many were purged.
    ///
    /// A call is abandoned once the table holds the only reference to its
    /// collector. Calls someone still waits on are kept, however old.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let before = self.calls.len();
        self.calls
            .retain(|_, collector| collector.age() < ttl || Arc::strong_count(collector) > 1);
        before.saturating_sub(self.calls.len())
    }

    /// Remove and return every pending call
    pub fn drain(&self) -> Vec<Arc<ResponseCollector>> {
        let request_ids: Vec<RequestId> = self.calls.iter().map(|entry| *entry.key()).collect();
        request_ids
            .into_iter()
            .filter_map(|request_id| self.discard(&request_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use proptest::prelude::*;
    use serde_json::json;
    use crate::types::ClusterNode;

    fn node(id: &str) -> ClusterNode {
        ClusterNode::new(NodeId::new(id), "127.0.0.1:7000".parse().unwrap())
    }

    fn response(request_id: RequestId, id: &str) -> ClusterNodeResponse {
        ClusterNodeResponse::from_node(request_id, node(id), Ok(json!(id)))
    }

    fn expected(ids: &[&str]) -> HashSet<NodeId> {
        ids.iter().map(|id| NodeId::new(*id)).collect()
    }

    #[test]
    fn test_resolves_when_all_expected_reported() {
        let request_id = RequestId::new();
        let collector = ResponseCollector::new(request_id, expected(&["a", "b"]));

        assert!(!collector.record(response(request_id, "a")));
        assert!(!collector.is_resolved());
        assert!(collector.record(response(request_id, "b")));
        assert!(collector.is_resolved());
    }

    #[test]
    fn test_unexpected_node_does_not_resolve() {
        let request_id = RequestId::new();
        let collector = ResponseCollector::new(request_id, expected(&["a"]));

        collector.record(response(request_id, "stranger"));

        assert!(!collector.is_resolved());
        assert_eq!(collector.snapshot().len(), 1);
    }

    #[test]
    fn test_empty_expected_set_is_resolved() {
        let collector = ResponseCollector::new(RequestId::new(), HashSet::new());
        let future = FutureClusterResponses::new(Arc::new(collector));

        assert!(future.is_done());
        assert!(future.get().is_empty());
    }

    #[test]
    fn test_timeout_leaves_collector_untouched() {
        let request_id = RequestId::new();
        let collector = Arc::new(ResponseCollector::new(request_id, expected(&["a"])));
        let future = FutureClusterResponses::new(Arc::clone(&collector));

        let result = future.get_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(ClusterError::WaitTimeout { .. })));

        collector.record(response(request_id, "a"));
        let responses = future.get_timeout(Duration::from_millis(20)).unwrap();
        assert!(responses.contains(&NodeId::new("a")));
    }

    #[test]
    fn test_detached_collector_never_resolves() {
        let request_id = RequestId::new();
        let collector = Arc::new(ResponseCollector::detached(request_id, expected(&["a"])));
        let future = FutureClusterResponses::new(Arc::clone(&collector));

        collector.record(response(request_id, "a"));

        assert!(future.get_timeout(Duration::from_millis(20)).is_err());
        assert_eq!(future.peek().len(), 1);
    }

    #[test]
    fn test_waiter_is_released_from_another_thread() {
        let request_id = RequestId::new();
        let collector = Arc::new(ResponseCollector::new(request_id, expected(&["a", "b"])));
        let future = FutureClusterResponses::new(Arc::clone(&collector));

        let recorder = thread::spawn(move || {
            collector.record(response(request_id, "a"));
            collector.record(response(request_id, "b"));
        });

        let responses = future.get_timeout(Duration::from_secs(5)).unwrap();
        recorder.join().unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn test_pending_calls_remove_resolved_entries() {
        let table = PendingCalls::new();
        let request_id = RequestId::new();
        table.register(request_id, expected(&["a"]));

        assert!(table.record(response(request_id, "a")));
        assert!(table.is_empty());
        assert!(!table.record(response(request_id, "a")));
    }

    #[test]
    fn test_sweep_expired() {
        let table = PendingCalls::new();
        table.register(RequestId::new(), expected(&["a"]));
        thread::sleep(Duration::from_millis(20));
        table.register(RequestId::new(), expected(&["a"]));

        assert_eq!(table.sweep_expired(Duration::from_millis(10)), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sweep_keeps_calls_with_waiters() {
        let table = PendingCalls::new();
        let request_id = RequestId::new();
        let future = FutureClusterResponses::new(table.register(request_id, expected(&["a"])));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(table.sweep_expired(Duration::from_millis(10)), 0);

        // A late response still reaches the waiter
        assert!(table.record(response(request_id, "a")));
        assert!(future.get_timeout(Duration::from_millis(20)).is_ok());

        let request_id = RequestId::new();
        drop(table.register(request_id, expected(&["a"])));
        drop(future);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(table.sweep_expired(Duration::from_millis(10)), 1);
        assert!(table.get(&request_id).is_none());
    }

    #[test]
    fn test_abandon_fails_unreported_nodes() {
        let table = PendingCalls::new();
        let request_id = RequestId::new();
        let collector = table.register(request_id, expected(&["a", "b"]));
        let future = FutureClusterResponses::new(Arc::clone(&collector));
        table.record(response(request_id, "a"));

        let waiter = thread::spawn(move || future.get());
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert!(table.is_empty());
        assert!(drained[0].abandon(&NodeFailure::ExecutorDestroyed));
        assert!(!collector.abandon(&NodeFailure::ExecutorDestroyed));

        let responses = waiter.join().unwrap();
        assert!(responses.get(&NodeId::new("a")).unwrap().is_success());
        assert!(matches!(
            responses.get(&NodeId::new("b")).unwrap().failure(),
            Some(NodeFailure::ExecutorDestroyed)
        ));
    }

    proptest! {
        #[test]
        fn prop_resolves_exactly_once(
            expected_count in 1usize..6,
            extra in proptest::collection::vec(0usize..8, 0..20),
            threads in 1usize..4,
        ) {
            let request_id = RequestId::new();
            let ids: Vec<String> = (0..expected_count).map(|i| format!("n{}", i)).collect();
            let expected: HashSet<NodeId> = ids.iter().map(|id| NodeId::new(id.as_str())).collect();
            let collector = Arc::new(ResponseCollector::new(request_id, expected));

            // Every expected node reports at least once, plus arbitrary repeats
            // and strangers, spread over several threads.
            let mut reports: Vec<String> = ids.clone();
            reports.extend(extra.iter().map(|i| format!("n{}", i)));

            let chunk = (reports.len() + threads - 1) / threads;
            let handles: Vec<_> = reports
                .chunks(chunk.max(1))
                .map(|chunk| {
                    let collector = Arc::clone(&collector);
                    let chunk = chunk.to_vec();
                    thread::spawn(move || {
                        chunk
                            .iter()
                            .filter(|id| collector.record(response(request_id, id)))
                            .count()
                    })
                })
                .collect();

            let transitions: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            prop_assert_eq!(transitions, 1);
            prop_assert!(collector.is_resolved());
        }
    }
}
