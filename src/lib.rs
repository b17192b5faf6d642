//! # ream-cluster
//!
//! Cluster execution core: invoke an operation on every member of a dynamic
//! group or on named members, collect the per-node outcomes into a single
//! awaitable result, and react to members joining and departing.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod cluster;

// Re-export main types
pub use types::{Address, ClusterNode, NodeId, RequestId};
pub use error::{ClusterError, ClusterResult, NodeFailure, TransportError};
pub use config::ClusterConfig;
pub use cluster::{
    ClusterEvent, ClusterEventListener, ClusterEventType, ClusterExecutor, ClusterNodeResponse,
    ClusterNodeResponses, ClusterRequest, FutureClusterResponses, MethodHandler, MethodKey, MethodRegistry,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
