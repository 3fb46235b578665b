//! # Transport
//!
//! The two primitives the protocol needs, `send_to_authority` and
//! `broadcast_to_all`, plus an in-process loopback network built on
//! crossbeam channels.
//!
//! ## Loopback Topology
//!
//! ```text
//!  PeerLink ──┐                         ┌──> PeerLink inbox
//!  PeerLink ──┼──> request channel ──>  │    ...
//!  PeerLink ──┘      AuthorityLink ─────┴──> PeerLink inbox
//! ```
//!
//! Sends never block. Receivers drain whatever has arrived at the start of
//! their tick. [`LinkConditions`] inject the failure modes of a real network
//! (lost and repeated messages) per peer.

use std::sync::Arc;

use amalgam_core::PeerId;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult};
use crate::protocol::{CompositionBroadcast, CompositionRequest};

// ============================================================================
// TRAITS
// ============================================================================

/// A message tagged with its sender.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope<T> {
    /// Sending peer.
    pub from: PeerId,
    /// Message body.
    pub payload: T,
}

/// A peer's end of the network.
pub trait PeerTransport: Send {
    /// Sends a request to the authority. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the authority is gone.
    fn send_to_authority(&self, request: CompositionRequest) -> EngineResult<()>;

    /// Takes every broadcast that has arrived since the last call.
    fn drain_broadcasts(&self) -> Vec<CompositionBroadcast>;
}

/// The authority's end of the network.
pub trait AuthorityTransport: Send {
    /// Sends a broadcast to every connected peer. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the network itself is gone.
    fn broadcast_to_all(&self, broadcast: CompositionBroadcast) -> EngineResult<()>;

    /// Takes every request that has arrived since the last call.
    fn drain_requests(&self) -> Vec<Envelope<CompositionRequest>>;
}

// ============================================================================
// LINK CONDITIONS
// ============================================================================

/// Failure injection for one peer's link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkConditions {
    /// Broadcasts to this peer are lost.
    pub drop_broadcasts: bool,
    /// Broadcasts to this peer arrive twice.
    pub duplicate_broadcasts: bool,
    /// Requests from this peer arrive twice.
    pub duplicate_requests: bool,
}

impl LinkConditions {
    /// A perfect link.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            drop_broadcasts: false,
            duplicate_broadcasts: false,
            duplicate_requests: false,
        }
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Unbounded crossbeam channel that keeps both ends together.
struct EventChannel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> EventChannel<T> {
    fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }
}

struct PeerEntry {
    id: PeerId,
    inbox: Sender<CompositionBroadcast>,
    conditions: LinkConditions,
}

type Directory = Arc<RwLock<Vec<PeerEntry>>>;

fn conditions_of(directory: &Directory, peer: PeerId) -> LinkConditions {
    directory
        .read()
        .iter()
        .find(|entry| entry.id == peer)
        .map(|entry| entry.conditions)
        .unwrap_or_default()
}

// ============================================================================
// LOOPBACK NETWORK
// ============================================================================

/// In-process network connecting one authority with any number of peers.
pub struct LoopbackNetwork {
    requests: EventChannel<Envelope<CompositionRequest>>,
    directory: Directory,
}

impl LoopbackNetwork {
    /// Creates a network with no peers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: EventChannel::unbounded(),
            directory: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a peer and returns its link. Reconnecting an id replaces its
    /// inbox; broadcasts queued for the old link are lost.
    #[must_use]
    pub fn connect_peer(&self, id: PeerId) -> PeerLink {
        let inbox = EventChannel::unbounded();

        let mut directory = self.directory.write();
        directory.retain(|entry| entry.id != id);
        directory.push(PeerEntry {
            id,
            inbox: inbox.sender(),
            conditions: LinkConditions::reliable(),
        });
        debug!(peer = %id, peers = directory.len(), "peer connected");

        PeerLink {
            id,
            outbox: self.requests.sender(),
            inbox: inbox.receiver(),
            directory: Arc::clone(&self.directory),
        }
    }

    /// Returns the authority's link.
    #[must_use]
    pub fn authority_link(&self) -> AuthorityLink {
        AuthorityLink {
            inbox: self.requests.receiver(),
            directory: Arc::clone(&self.directory),
        }
    }

    /// Changes a peer's link conditions. Returns `false` for an unknown peer.
    pub fn set_conditions(&self, peer: PeerId, conditions: LinkConditions) -> bool {
        let mut directory = self.directory.write();
        match directory.iter_mut().find(|entry| entry.id == peer) {
            Some(entry) => {
                entry.conditions = conditions;
                true
            }
            None => false,
        }
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.directory.read().len()
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A peer's connection to a [`LoopbackNetwork`].
pub struct PeerLink {
    id: PeerId,
    outbox: Sender<Envelope<CompositionRequest>>,
    inbox: Receiver<CompositionBroadcast>,
    directory: Directory,
}

impl PeerLink {
    /// Peer this link belongs to.
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// Broadcasts delivered to this link but not drained yet.
    #[must_use]
    pub fn pending_broadcasts(&self) -> usize {
        self.inbox.len()
    }
}

impl PeerTransport for PeerLink {
    fn send_to_authority(&self, request: CompositionRequest) -> EngineResult<()> {
        let copies = if conditions_of(&self.directory, self.id).duplicate_requests {
            2
        } else {
            1
        };

        for _ in 0..copies {
            self.outbox
                .send(Envelope {
                    from: self.id,
                    payload: request.clone(),
                })
                .map_err(|_| EngineError::Disconnected(format!("{} -> authority", self.id)))?;
        }
        Ok(())
    }

    fn drain_broadcasts(&self) -> Vec<CompositionBroadcast> {
        self.inbox.try_iter().collect()
    }
}

/// The authority's connection to a [`LoopbackNetwork`].
pub struct AuthorityLink {
    inbox: Receiver<Envelope<CompositionRequest>>,
    directory: Directory,
}

impl AuthorityTransport for AuthorityLink {
    fn broadcast_to_all(&self, broadcast: CompositionBroadcast) -> EngineResult<()> {
        let directory = self.directory.read();
        for entry in directory.iter() {
            if entry.conditions.drop_broadcasts {
                trace!(peer = %entry.id, "broadcast dropped by link conditions");
                continue;
            }

            let copies = if entry.conditions.duplicate_broadcasts { 2 } else { 1 };
            for _ in 0..copies {
                if entry.inbox.send(broadcast.clone()).is_err() {
                    debug!(peer = %entry.id, "peer inbox closed, skipping");
                    break;
                }
            }
        }
        Ok(())
    }

    fn drain_requests(&self) -> Vec<Envelope<CompositionRequest>> {
        self.inbox.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerId;
    use crate::protocol::{RequestHeader, UnitSnapshot};
    use amalgam_core::{Unit, UnitId, Vec3};

    fn split_request(peer: u32) -> CompositionRequest {
        CompositionRequest::Split {
            header: RequestHeader {
                ledger: LedgerId(peer),
                authority: PeerId(peer),
            },
            unit: UnitId::new(0, 0),
        }
    }

    fn state() -> CompositionBroadcast {
        CompositionBroadcast::UnitState(UnitSnapshot {
            id: UnitId::new(0, 0),
            unit: Unit::new(PeerId(1)),
            position: Vec3::ZERO,
            scale: Vec3::ONE,
        })
    }

    #[test]
    fn test_requests_reach_authority_tagged() {
        let network = LoopbackNetwork::new();
        let authority = network.authority_link();
        let a = network.connect_peer(PeerId(1));
        let b = network.connect_peer(PeerId(2));

        a.send_to_authority(split_request(1)).unwrap();
        b.send_to_authority(split_request(2)).unwrap();

        let received = authority.drain_requests();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].from, PeerId(1));
        assert_eq!(received[1].from, PeerId(2));
        assert!(authority.drain_requests().is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let network = LoopbackNetwork::new();
        let authority = network.authority_link();
        let peers: Vec<_> = (1..=3).map(|i| network.connect_peer(PeerId(i))).collect();

        authority.broadcast_to_all(state()).unwrap();

        for peer in &peers {
            assert_eq!(peer.pending_broadcasts(), 1);
            assert_eq!(peer.drain_broadcasts(), vec![state()]);
            assert_eq!(peer.pending_broadcasts(), 0);
        }
    }

    #[test]
    fn test_link_conditions() {
        let network = LoopbackNetwork::new();
        let authority = network.authority_link();
        let lossy = network.connect_peer(PeerId(1));
        let noisy = network.connect_peer(PeerId(2));

        assert!(network.set_conditions(
            PeerId(1),
            LinkConditions {
                drop_broadcasts: true,
                ..LinkConditions::reliable()
            }
        ));
        assert!(network.set_conditions(
            PeerId(2),
            LinkConditions {
                duplicate_broadcasts: true,
                duplicate_requests: true,
                ..LinkConditions::reliable()
            }
        ));
        assert!(!network.set_conditions(PeerId(9), LinkConditions::reliable()));

        authority.broadcast_to_all(state()).unwrap();
        assert!(lossy.drain_broadcasts().is_empty());
        assert_eq!(noisy.drain_broadcasts().len(), 2);

        noisy.send_to_authority(split_request(2)).unwrap();
        assert_eq!(authority.drain_requests().len(), 2);
    }

    #[test]
    fn test_reconnect_replaces_inbox() {
        let network = LoopbackNetwork::new();
        let _old = network.connect_peer(PeerId(1));
        let new = network.connect_peer(PeerId(1));
        assert_eq!(network.peer_count(), 1);

        network.authority_link().broadcast_to_all(state()).unwrap();
        assert_eq!(new.drain_broadcasts().len(), 1);
    }
}
