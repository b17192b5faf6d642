//! Error types for the cluster executor
//!
//! Failures are split in two tiers. [`ClusterError`] is raised synchronously
//! to the caller of an executor operation (initialization, sending, waiting).
//! [`NodeFailure`] describes why a single node could not produce a result; it
//! travels inside the response set and never fails the call as a whole.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::cluster::invoker::MethodKey;
use crate::types::{NodeId, RequestId};

/// Message carried by [`NodeFailure::InvalidPayload`]
pub const INVALID_PAYLOAD_MESSAGE: &str = "Payload is not of type MethodHandler";

/// Message carried by [`NodeFailure::NotTransportable`]
pub const NOT_TRANSPORTABLE_MESSAGE: &str = "Return value is not serializable";

/// Result type for executor operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Call-level errors raised to the invoking caller
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The transport could not be connected at startup
    #[error("Unable to initialize")]
    InitializationFailed(#[source] TransportError),

    /// A multicast request could not be handed to the transport
    #[error("Unable to send multicast request")]
    MulticastSendFailed(#[source] TransportError),

    /// A unicast request could not be handed to the transport
    #[error("Unable to send unicast request")]
    UnicastSendFailed(#[source] TransportError),

    /// The caller's bounded wait expired before all responses arrived
    #[error("Timed out after {timeout:?} waiting for responses to request {request_id}")]
    WaitTimeout {
        request_id: RequestId,
        timeout: Duration,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wire message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a group transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has no live connection
    #[error("Transport is not connected")]
    NotConnected,

    /// Connecting to the group failed
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The message could not be transmitted at all
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Why one node failed to produce a result for a request
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFailure {
    /// The request payload is not an invocable method handler
    #[error("{}", INVALID_PAYLOAD_MESSAGE)]
    InvalidPayload,

    /// No method is registered under the requested key
    #[error("No method registered for {0}")]
    UnresolvedMethod(MethodKey),

    /// The method ran and failed
    #[error("{message}")]
    InvocationFailed {
        /// Message of the original error
        message: String,
        /// Messages of the underlying causes, outermost first
        causes: Vec<String>,
    },

    /// The method returned a value that cannot cross node boundaries
    #[error("{}: {reason}", NOT_TRANSPORTABLE_MESSAGE)]
    NotTransportable { reason: String },

    /// A unicast target does not map to any current member
    #[error("Cluster node {0} is not a member of the cluster")]
    UnknownNode(NodeId),

    /// The executor was destroyed while the call was still waiting
    #[error("Cluster executor was destroyed before the node responded")]
    ExecutorDestroyed,
}

impl NodeFailure {
    /// Capture an invocation error, keeping its full cause chain
    pub fn from_error(error: &anyhow::Error) -> Self {
        NodeFailure::InvocationFailed {
            message: error.to_string(),
            causes: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }

    /// Message of the original failure, without wrapping
    pub fn message(&self) -> String {
        match self {
            NodeFailure::InvocationFailed { message, .. } => message.clone(),
            NodeFailure::NotTransportable { .. } => NOT_TRANSPORTABLE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
