//! # Session
//!
//! One authority and any number of peers wired together over a
//! [`LoopbackNetwork`], stepped in lockstep. This is the harness the
//! simulator and the scenario tests drive.
//!
//! ## Step
//!
//! ```text
//! every peer:  apply broadcasts -> advance ledgers -> send end requests
//! authority:   handle requests  -> replicate        -> broadcast
//! ```
//!
//! A broadcast sent during step `n` is applied by peers at the start of
//! step `n + 1`.

use std::sync::Arc;

use amalgam_core::{AttributeTable, PeerId, Unit, UnitId, UnitRegistry, Vec3};
use tracing::info;

use crate::authority::{Authority, AuthorityTickReport};
use crate::config::EngineConfig;
use crate::controller::MockEntityController;
use crate::error::EngineResult;
use crate::ledger::LedgerId;
use crate::peer::{Peer, PeerBuilder};
use crate::selection::Selection;
use crate::transport::{AuthorityLink, LinkConditions, LoopbackNetwork, PeerLink};

/// A peer as wired by [`Session`].
pub type SessionPeer = Peer<Selection, MockEntityController, PeerLink>;

/// An authority as wired by [`Session`].
pub type SessionAuthority = Authority<MockEntityController, AuthorityLink>;

/// A complete in-process session.
pub struct Session {
    config: EngineConfig,
    table: Arc<AttributeTable>,
    network: LoopbackNetwork,
    authority: SessionAuthority,
    peers: Vec<SessionPeer>,
    ticks: u64,
}

impl Session {
    /// Creates a session with an authority and no peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or the table fails validation.
    pub fn new(config: EngineConfig, table: AttributeTable) -> EngineResult<Self> {
        config.validate()?;
        table.validate()?;

        let table = Arc::new(table);
        let network = LoopbackNetwork::new();
        let authority = Authority::new(
            config.clone(),
            Arc::clone(&table),
            MockEntityController::new(),
            network.authority_link(),
        );

        Ok(Self {
            config,
            table,
            network,
            authority,
            peers: Vec::new(),
            ticks: 0,
        })
    }

    /// Connects a new peer and cross-registers ledgers with everyone else.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be built.
    pub fn add_peer(&mut self) -> EngineResult<PeerId> {
        let id = PeerId(self.peers.len() as u32 + 1);
        let ledger = LedgerId(id.0);

        let mut peer = PeerBuilder::new(id)
            .ledger(ledger)
            .config(self.config.clone())
            .table(Arc::clone(&self.table))
            .selection(Selection::new())
            .controller(MockEntityController::new())
            .transport(self.network.connect_peer(id))
            .build()?;

        for other in &mut self.peers {
            other.mirror_ledger(ledger, id);
            peer.mirror_ledger(other.ledger_id(), other.id());
        }

        info!(peer = %id, peers = self.peers.len() + 1, "peer joined session");
        self.peers.push(peer);
        Ok(id)
    }

    /// Spawns a unit on the authority. Peers see it after the next step.
    pub fn spawn_unit(&mut self, unit: Unit, position: Vec3) -> UnitId {
        self.authority.spawn_unit(unit, position, Vec3::ONE)
    }

    /// Looks up a peer.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&SessionPeer> {
        self.peers.iter().find(|p| p.id() == id)
    }

    /// Looks up a peer mutably.
    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut SessionPeer> {
        self.peers.iter_mut().find(|p| p.id() == id)
    }

    /// All peers in join order.
    pub fn peers(&self) -> impl Iterator<Item = &SessionPeer> {
        self.peers.iter()
    }

    /// The authority.
    #[must_use]
    pub const fn authority(&self) -> &SessionAuthority {
        &self.authority
    }

    /// Changes one peer's link conditions.
    pub fn set_link_conditions(&self, peer: PeerId, conditions: LinkConditions) -> bool {
        self.network.set_conditions(peer, conditions)
    }

    /// Steps taken so far.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances every peer by one tick, then lets the authority respond.
    ///
    /// # Errors
    ///
    /// Returns an error if any transport fails.
    pub fn step(&mut self) -> EngineResult<AuthorityTickReport> {
        let dt = self.config.tick_delta_secs();
        for peer in &mut self.peers {
            peer.tick(dt)?;
        }
        let report = self.authority.tick()?;
        self.ticks += 1;
        Ok(report)
    }

    /// Runs `steps` steps and collects every authority report.
    ///
    /// # Errors
    ///
    /// Returns an error if any transport fails.
    pub fn run(&mut self, steps: u32) -> EngineResult<Vec<AuthorityTickReport>> {
        (0..steps).map(|_| self.step()).collect()
    }

    /// True when nothing is in flight anywhere: no peer animates a group,
    /// no broadcast waits in a peer inbox and no unit is locked on the
    /// authority or on any replica.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        let unlocked = |registry: &UnitRegistry| registry.iter().all(|(_, unit)| !unit.is_locked());

        unlocked(self.authority.registry())
            && self.peers.iter().all(|p| {
                p.active_transitions() == 0
                    && p.transport().pending_broadcasts() == 0
                    && unlocked(p.registry())
            })
    }

    /// Steps until [`Session::is_quiet`] holds, at most `max_steps` times.
    /// Returns the number of steps taken.
    ///
    /// # Errors
    ///
    /// Returns an error if any transport fails.
    pub fn run_until_quiet(&mut self, max_steps: u32) -> EngineResult<u32> {
        for taken in 0..max_steps {
            if taken > 0 && self.is_quiet() {
                return Ok(taken);
            }
            self.step()?;
        }
        Ok(max_steps)
    }

    /// Delivers everything the authority has queued without advancing time.
    ///
    /// # Errors
    ///
    /// Returns an error if any transport fails.
    pub fn settle(&mut self) -> EngineResult<AuthorityTickReport> {
        let report = self.authority.tick()?;
        for peer in &mut self.peers {
            peer.tick(0.0)?;
        }
        Ok(report)
    }
}
