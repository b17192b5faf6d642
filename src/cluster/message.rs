//! Wire envelope exchanged between executors

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use crate::cluster::request::DispatchedRequest;
use crate::cluster::response::ClusterNodeResponse;
use crate::error::ClusterResult;
use crate::types::ClusterNode;

/// Everything an executor sends through the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Announce the sender's node record
    Notify(ClusterNode),
    /// Execute a request
    Request(DispatchedRequest),
    /// Outcome of a request executed by the sender
    Response(ClusterNodeResponse),
}

impl ClusterMessage {
    pub fn encode(&self) -> ClusterResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> ClusterResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
