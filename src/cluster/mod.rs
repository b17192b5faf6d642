//! Cluster execution core
//!
//! Membership tracking, topology listeners, local invocation, response
//! correlation and request dispatch over a pluggable group transport.

pub mod identity;
pub mod listener;
pub mod membership;
pub mod invoker;
pub mod request;
pub mod response;
pub mod future;
pub mod message;
pub mod transport;
pub mod memory;
pub mod worker_pool;
pub mod executor;

// Re-export the caller surface
pub use executor::ClusterExecutor;
pub use identity::{IdGenerator, NodeIdentityProvider, SequentialIdGenerator, StaticNodeIdentity, UuidGenerator};
pub use listener::{ClusterEvent, ClusterEventListener, ClusterEventType, DebuggingClusterEventListener, ListenerRegistry};
pub use membership::MembershipTracker;
pub use invoker::{argument, InvocationContext, LocalInvoker, MethodHandler, MethodKey, MethodRegistry, TransportValue};
pub use request::{ClusterRequest, DispatchedRequest, Payload, RequestMode};
pub use response::{ClusterNodeResponse, ClusterNodeResponses};
pub use future::{FutureClusterResponses, PendingCalls, ResponseCollector};
pub use message::ClusterMessage;
pub use transport::{Destination, Transport, TransportReceiver};
pub use memory::{MemoryGroup, MemoryTransport};
pub use worker_pool::WorkerPool;
