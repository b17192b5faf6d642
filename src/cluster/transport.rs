//! Group transport contract
//!
//! The executor does not implement group communication. A transport provides
//! reliable broadcast, addressed sends and view-change notification; the
//! executor plugs in as the [`TransportReceiver`].

use std::sync::Arc;
use bytes::Bytes;
use crate::error::TransportError;
use crate::types::Address;

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every member of the current view, the sender included
    Broadcast,
    /// A single member
    Member(Address),
}

/// Callbacks a transport invokes on its own delivery threads
pub trait TransportReceiver: Send + Sync {
    /// The view changed: `joined` addresses are new, `departed` are gone
    fn view_accepted(&self, joined: &[Address], departed: &[Address]);

    /// A message arrived from `from`
    fn receive(&self, from: Address, payload: Bytes);
}

/// Group communication endpoint
pub trait Transport: Send + Sync {
    /// Join the group. The receiver stays registered until [`disconnect`](Self::disconnect).
    fn connect(&self, receiver: Arc<dyn TransportReceiver>) -> Result<Address, TransportError>;

    /// Leave the group; safe to call when not connected
    fn disconnect(&self);

    /// Hand a message to the group. An error means nothing was transmitted,
    /// not that some recipient missed it.
    fn send(&self, destination: Destination, payload: Bytes) -> Result<(), TransportError>;

    /// Address of this endpoint while connected
    fn local_address(&self) -> Option<Address>;
}
