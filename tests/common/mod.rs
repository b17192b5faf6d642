//! Shared harness for the executor integration tests

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use ream_cluster::cluster::{
    argument, ClusterEvent, ClusterEventListener, ClusterEventType, ClusterExecutor, IdGenerator, MemoryGroup,
    MemoryTransport, MethodKey, MethodRegistry, SequentialIdGenerator, StaticNodeIdentity, Transport,
};
use ream_cluster::{Address, ClusterConfig, ClusterNode, NodeId};

pub const WAIT: Duration = Duration::from_secs(5);

static NEXT_PORT: AtomicU16 = AtomicU16::new(9100);

pub fn key(method: &str) -> MethodKey {
    MethodKey::new("TestBean", method)
}

/// Return value that refuses to serialize
pub struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("handle cannot leave the process"))
    }
}

/// Methods exposed to the cluster, recording which node ran what
#[derive(Default)]
pub struct TestBean {
    calls: Mutex<Vec<(NodeId, String)>>,
}

impl TestBean {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry with:
    /// - `record(text)`: remembers `text` and returns it, `null` for blank text
    /// - `opaque()`: returns a value that cannot be serialized
    /// - `fail(text)`: fails with `text` as the message
    /// - `cluster_flag()`: reports whether it runs on behalf of the cluster
    /// - `pause(millis)`: sleeps for `millis` and returns it
    pub fn registry(self: &Arc<Self>) -> Arc<MethodRegistry> {
        let registry = MethodRegistry::new();

        let bean = Arc::clone(self);
        registry.register(key("record"), move |ctx, args| {
            let text: String = argument(args, 0)?;
            let node_id = ctx
                .local_node()
                .map(|node| node.node_id().clone())
                .unwrap_or_else(|| NodeId::new("direct"));
            bean.calls.lock().push((node_id, text.clone()));
            Ok((!text.is_empty()).then_some(text))
        });
        registry.register(key("opaque"), |_, _| Ok(Unserializable));
        registry.register(key("fail"), |_, args| -> anyhow::Result<()> {
            let message: String = argument(args, 0)?;
            Err(anyhow::anyhow!(message))
        });
        registry.register(key("cluster_flag"), |ctx, _| Ok(ctx.is_cluster_invocation()));
        registry.register(key("pause"), |_, args| {
            let millis: u64 = argument(args, 0)?;
            std::thread::sleep(Duration::from_millis(millis));
            Ok(millis)
        });

        Arc::new(registry)
    }

    pub fn calls(&self) -> Vec<(NodeId, String)> {
        self.calls.lock().clone()
    }

    /// Wait until `node_id` has recorded `text`
    pub fn wait_for_call(&self, node_id: &NodeId, text: &str, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.calls()
                .iter()
                .any(|(caller, recorded)| caller == node_id && recorded == text)
        })
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn next_socket_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, NEXT_PORT.fetch_add(1, Ordering::Relaxed)))
}

pub fn test_config() -> ClusterConfig {
    ClusterConfig {
        worker_threads: 2,
        ..ClusterConfig::enabled()
    }
}

/// An executor together with its in-memory endpoint
pub struct TestNode {
    pub executor: ClusterExecutor,
    pub transport: Arc<MemoryTransport>,
}

impl TestNode {
    /// Build a node without initializing it
    pub fn build(
        group: &MemoryGroup,
        config: ClusterConfig,
        registry: Arc<MethodRegistry>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let transport = Arc::new(group.transport());
        let identity = StaticNodeIdentity::generated(ids.as_ref(), next_socket_address());
        let executor = ClusterExecutor::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(identity),
            ids,
            registry,
        );
        Self { executor, transport }
    }

    /// Build and initialize a node
    pub fn start(group: &MemoryGroup, registry: Arc<MethodRegistry>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIdGenerator::new(format!(
            "node{}",
            NEXT_PORT.load(Ordering::Relaxed)
        )));
        let node = Self::build(group, test_config(), registry, ids);
        node.executor.initialize().unwrap();
        node
    }

    pub fn node(&self) -> ClusterNode {
        self.executor.local_node().unwrap()
    }

    pub fn node_id(&self) -> NodeId {
        self.node().node_id().clone()
    }

    pub fn address(&self) -> Address {
        self.transport.local_address().unwrap()
    }
}

/// Start `count` nodes and wait until every one of them sees all the others
pub fn start_cluster(group: &MemoryGroup, registry: &Arc<MethodRegistry>, count: usize) -> Vec<TestNode> {
    let nodes: Vec<TestNode> = (0..count)
        .map(|_| TestNode::start(group, Arc::clone(registry)))
        .collect();

    let converged = wait_until(WAIT, || {
        nodes.iter().all(|node| node.executor.list_members().len() == count)
    });
    assert!(converged, "membership did not converge");
    nodes
}

/// Listener that forwards topology events to a channel
pub struct MockClusterEventListener {
    sender: Sender<ClusterEvent>,
    receiver: Receiver<ClusterEvent>,
}

impl MockClusterEventListener {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = unbounded();
        Arc::new(Self { sender, receiver })
    }

    /// Wait for the next event of `event_type` about `node`, skipping others
    pub fn wait_for(&self, event_type: ClusterEventType, node: &ClusterNode, timeout: Duration) -> Option<ClusterEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self.receiver.recv_timeout(remaining).ok()?;
            if event.event_type() == event_type && event.nodes().contains(node) {
                return Some(event);
            }
        }
    }

    /// Next event of any kind
    pub fn next_event(&self, timeout: Duration) -> Option<ClusterEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl ClusterEventListener for MockClusterEventListener {
    fn process_cluster_event(&self, event: &ClusterEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// In-memory sink for formatted log output
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber writing records at or above
/// `level` into `logs`
pub fn with_captured_logs<T>(
    logs: &CapturedLogs,
    level: tracing_subscriber::filter::LevelFilter,
    f: impl FnOnce() -> T,
) -> T {
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}
