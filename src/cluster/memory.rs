//! In-process group transport
//!
//! A [`MemoryGroup`] is a message bus shared by several [`MemoryTransport`]
//! endpoints living in the same process. Each connected endpoint owns a
//! delivery thread that drains its inbox in order and calls back into the
//! registered [`TransportReceiver`], the same threading model a real group
//! transport imposes on the executor.
//!
//! Members can be isolated from the rest of the group and healed again to
//! simulate network partitions, and each endpoint supports failure injection
//! for connects and sends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use crate::cluster::transport::{Destination, Transport, TransportReceiver};
use crate::error::TransportError;
use crate::types::Address;

enum Delivery {
    View {
        joined: Vec<Address>,
        departed: Vec<Address>,
    },
    Message {
        from: Address,
        payload: Bytes,
    },
    Stop,
}

struct MemberSlot {
    address: Address,
    inbox: Sender<Delivery>,
    isolated: bool,
}

impl MemberSlot {
    fn sees(&self, other: &MemberSlot) -> bool {
        self.address == other.address || (!self.isolated && !other.isolated)
    }

    fn deliver(&self, delivery: Delivery) {
        // A closed inbox means the member is shutting down
        let _ = self.inbox.send(delivery);
    }
}

#[derive(Default)]
struct GroupState {
    members: Vec<MemberSlot>,
}

/// Shared in-process bus
#[derive(Clone, Default)]
pub struct MemoryGroup {
    state: Arc<Mutex<GroupState>>,
}

impl MemoryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// New, unconnected endpoint on this bus
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            group: self.clone(),
            address: Mutex::new(None),
            fail_next_connect: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Addresses currently connected
    pub fn members(&self) -> Vec<Address> {
        self.state.lock().members.iter().map(|slot| slot.address).collect()
    }

    /// Cut `address` off from every other member. Both sides observe the
    /// others departing.
    pub fn isolate(&self, address: Address) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(index) = state.members.iter().position(|slot| slot.address == address) else {
            return;
        };
        if state.members[index].isolated {
            return;
        }

        let peers = visible_peers(&state.members, index);
        state.members[index].isolated = true;

        for &peer in &peers {
            state.members[peer].deliver(Delivery::View {
                joined: Vec::new(),
                departed: vec![address],
            });
        }
        state.members[index].deliver(Delivery::View {
            joined: Vec::new(),
            departed: peers.iter().map(|&peer| state.members[peer].address).collect(),
        });
    }

    /// Reconnect an isolated member to the rest of the group
    pub fn heal(&self, address: Address) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(index) = state.members.iter().position(|slot| slot.address == address) else {
            return;
        };
        if !state.members[index].isolated {
            return;
        }

        state.members[index].isolated = false;
        let peers = visible_peers(&state.members, index);

        for &peer in &peers {
            state.members[peer].deliver(Delivery::View {
                joined: vec![address],
                departed: Vec::new(),
            });
        }
        state.members[index].deliver(Delivery::View {
            joined: peers.iter().map(|&peer| state.members[peer].address).collect(),
            departed: Vec::new(),
        });
    }
}

impl std::fmt::Debug for MemoryGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGroup")
            .field("members", &self.state.lock().members.len())
            .finish()
    }
}

/// Indices of members visible from `index`, excluding itself
fn visible_peers(members: &[MemberSlot], index: usize) -> Vec<usize> {
    (0..members.len())
        .filter(|&peer| peer != index && members[index].sees(&members[peer]))
        .collect()
}

fn spawn_delivery(address: Address, inbox: Receiver<Delivery>, receiver: Arc<dyn TransportReceiver>) {
    let spawned = thread::Builder::new()
        .name(format!("memory-transport-{}", address))
        .spawn(move || {
            while let Ok(delivery) = inbox.recv() {
                match delivery {
                    Delivery::View { joined, departed } => receiver.view_accepted(&joined, &departed),
                    Delivery::Message { from, payload } => receiver.receive(from, payload),
                    Delivery::Stop => break,
                }
            }
        });

    if let Err(e) = spawned {
        tracing::error!(%address, error = %e, "unable to start delivery thread");
    }
}

/// One endpoint on a [`MemoryGroup`]
pub struct MemoryTransport {
    group: MemoryGroup,
    address: Mutex<Option<Address>>,
    fail_next_connect: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryTransport {
    /// Make the next [`connect`](Transport::connect) fail
    pub fn fail_next_connect(&self) {
        self.fail_next_connect.store(true, Ordering::SeqCst);
    }

    /// Make every send fail until switched off again
    pub fn set_send_failure(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn group(&self) -> &MemoryGroup {
        &self.group
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, receiver: Arc<dyn TransportReceiver>) -> Result<Address, TransportError> {
        if self.fail_next_connect.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let mut local = self.address.lock();
        if let Some(address) = *local {
            return Ok(address);
        }

        let address = Address::new();
        let (inbox_tx, inbox_rx) = unbounded();
        spawn_delivery(address, inbox_rx, receiver);
        *local = Some(address);

        let mut guard = self.group.state.lock();
        let state = &mut *guard;
        state.members.push(MemberSlot {
            address,
            inbox: inbox_tx,
            isolated: false,
        });
        let index = state.members.len() - 1;
        let peers = visible_peers(&state.members, index);

        for &peer in &peers {
            state.members[peer].deliver(Delivery::View {
                joined: vec![address],
                departed: Vec::new(),
            });
        }

        let mut view: Vec<Address> = peers.iter().map(|&peer| state.members[peer].address).collect();
        view.push(address);
        state.members[index].deliver(Delivery::View {
            joined: view,
            departed: Vec::new(),
        });

        tracing::debug!(%address, members = state.members.len(), "memory transport connected");
        Ok(address)
    }

    fn disconnect(&self) {
        let Some(address) = self.address.lock().take() else {
            return;
        };

        let mut guard = self.group.state.lock();
        let state = &mut *guard;
        let Some(index) = state.members.iter().position(|slot| slot.address == address) else {
            return;
        };

        let peers = visible_peers(&state.members, index);
        for &peer in &peers {
            state.members[peer].deliver(Delivery::View {
                joined: Vec::new(),
                departed: vec![address],
            });
        }

        let slot = state.members.remove(index);
        slot.deliver(Delivery::Stop);
        tracing::debug!(%address, "memory transport disconnected");
    }

    fn send(&self, destination: Destination, payload: Bytes) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("send failure injected".to_string()));
        }

        let from = (*self.address.lock()).ok_or(TransportError::NotConnected)?;

        let state = self.group.state.lock();
        let sender = state
            .members
            .iter()
            .find(|slot| slot.address == from)
            .ok_or(TransportError::NotConnected)?;

        match destination {
            Destination::Broadcast => {
                for slot in state.members.iter().filter(|slot| sender.sees(slot)) {
                    slot.deliver(Delivery::Message {
                        from,
                        payload: payload.clone(),
                    });
                }
            }
            Destination::Member(target) => {
                match state.members.iter().find(|slot| slot.address == target && sender.sees(slot)) {
                    Some(slot) => slot.deliver(Delivery::Message { from, payload }),
                    None => tracing::debug!(%from, %target, "dropping message for unreachable member"),
                }
            }
        }

        Ok(())
    }

    fn local_address(&self) -> Option<Address> {
        *self.address.lock()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("address", &self.local_address())
            .finish()
    }
}
