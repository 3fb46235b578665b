//! # Authority
//!
//! The single writer of ground-truth unit state.
//!
//! ## Tick
//!
//! ```text
//! 1. drain requests       (from every peer)
//! 2. validate + lock      (or reject, nothing broadcast)
//! 3. commit end requests  (exactly once per transition)
//! 4. replicate dirty units
//! 5. flush broadcasts
//! ```
//!
//! Validation and locking happen in the same step on a single-threaded
//! registry, so two requests racing for the same unit cannot both win.

use std::collections::BTreeSet;
use std::sync::Arc;

use amalgam_core::{
    AttributeTable, PeerId, TransitionId, TransitionKind, Unit, UnitId, UnitRegistry, Vec3,
};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::commit::{commit_merge, commit_split, CommitOutcome};
use crate::config::EngineConfig;
use crate::controller::EntityController;
use crate::error::{EngineResult, Rejection};
use crate::protocol::{
    Accepted, CompositionBroadcast, CompositionRequest, RequestHeader, UnitSnapshot,
};
use crate::transport::AuthorityTransport;

/// What the authority did with an accepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response {
    /// A transition was started and broadcast.
    Started(Accepted),
    /// An end request was committed (or found already committed).
    Committed(CommitOutcome),
}

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthorityStats {
    /// Transitions started.
    pub accepted: u64,
    /// Requests refused.
    pub rejected: u64,
    /// Transitions committed.
    pub commits: u64,
    /// End requests that found their transition already committed.
    pub duplicate_commits: u64,
    /// Unit snapshots broadcast.
    pub replicated: u64,
}

/// Per-tick result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthorityTickReport {
    /// Outcome of every request handled this tick, in arrival order.
    pub responses: Vec<(PeerId, Result<Response, Rejection>)>,
    /// Broadcasts sent.
    pub broadcasts: usize,
}

impl AuthorityTickReport {
    /// Rejections this tick.
    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.responses.iter().filter_map(|(_, r)| r.as_ref().err())
    }
}

/// Ground-truth owner of every unit in the session.
pub struct Authority<C: EntityController, T: AuthorityTransport> {
    config: EngineConfig,
    table: Arc<AttributeTable>,
    registry: UnitRegistry,
    controller: C,
    transport: T,
    rng: ChaCha8Rng,
    next_transition: u64,
    dirty: BTreeSet<UnitId>,
    outbox: Vec<CompositionBroadcast>,
    stats: AuthorityStats,
}

impl<C: EntityController, T: AuthorityTransport> Authority<C, T> {
    /// Creates an authority with an empty registry.
    #[must_use]
    pub fn new(config: EngineConfig, table: Arc<AttributeTable>, controller: C, transport: T) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Self {
            registry: UnitRegistry::with_capacity(table.capacity),
            config,
            table,
            controller,
            transport,
            rng,
            next_transition: 1,
            dirty: BTreeSet::new(),
            outbox: Vec::new(),
            stats: AuthorityStats::default(),
        }
    }

    /// Ground-truth registry.
    #[must_use]
    pub const fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// The authority's scene.
    #[must_use]
    pub const fn controller(&self) -> &C {
        &self.controller
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &AuthorityStats {
        &self.stats
    }

    /// Attribute table in use.
    #[must_use]
    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    /// Creates a unit and schedules it for replication.
    pub fn spawn_unit(&mut self, unit: Unit, position: Vec3, scale: Vec3) -> UnitId {
        let owner = unit.owner;
        let id = self.registry.spawn(unit);
        self.controller.spawn(id, position, scale);
        self.dirty.insert(id);
        debug!(unit = %id, %owner, "unit spawned");
        id
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// Handles every pending request, replicates changed units and flushes
    /// all broadcasts.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transport fails.
    pub fn tick(&mut self) -> EngineResult<AuthorityTickReport> {
        let mut report = AuthorityTickReport::default();

        for envelope in self.transport.drain_requests() {
            let result = self.handle_request(envelope.from, envelope.payload);
            report.responses.push((envelope.from, result));
        }

        self.replicate();
        report.broadcasts = self.flush()?;
        Ok(report)
    }

    /// Validates and applies one request. Broadcasts are queued, not sent.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] explaining why nothing happened.
    pub fn handle_request(
        &mut self,
        from: PeerId,
        request: CompositionRequest,
    ) -> Result<Response, Rejection> {
        let result = self.dispatch(from, request);
        match &result {
            Ok(Response::Started(_)) => self.stats.accepted += 1,
            Ok(Response::Committed(CommitOutcome::AlreadyCommitted)) => {
                self.stats.duplicate_commits += 1;
            }
            Ok(Response::Committed(_)) => self.stats.commits += 1,
            Err(rejection) => {
                self.stats.rejected += 1;
                debug!(peer = %from, %rejection, "request rejected");
            }
        }
        result
    }

    fn dispatch(&mut self, from: PeerId, request: CompositionRequest) -> Result<Response, Rejection> {
        check_header(from, request.header())?;

        match request {
            CompositionRequest::Merge {
                header,
                owner,
                merging,
            } => self.start_merge(from, header, owner, merging),
            CompositionRequest::Split { header, unit } => self.start_split(from, header, unit),
            CompositionRequest::EndMerge {
                header,
                transition,
                owner,
                merging,
            } => self.end_merge(from, header, transition, owner, merging),
            CompositionRequest::EndSplit {
                header,
                transition,
                owner,
                split,
            } => self.end_split(from, header, transition, owner, split),
        }
    }

    // ========================================================================
    // START
    // ========================================================================

    fn start_merge(
        &mut self,
        from: PeerId,
        header: RequestHeader,
        owner: UnitId,
        merging: UnitId,
    ) -> Result<Response, Rejection> {
        if owner == merging {
            return Err(Rejection::SelfMerge(owner));
        }

        let a = self.usable(from, owner)?;
        let b = self.usable(from, merging)?;
        if a.rank != b.rank {
            return Err(Rejection::RankMismatch {
                owner_rank: a.rank,
                merging_rank: b.rank,
            });
        }
        let rank = a.rank;
        let duration = self
            .table
            .merge_duration(rank)
            .ok_or(Rejection::MissingRow(rank))?;

        let transition = self.allocate_transition();
        let (a, b) = self
            .registry
            .get_pair_mut(owner, merging)
            .ok_or(Rejection::UnknownUnit(merging))?;
        let owner_locked = a.try_lock(transition, TransitionKind::Merge);
        let merging_locked = b.try_lock(transition, TransitionKind::Merge);
        debug_assert!(
            owner_locked && merging_locked,
            "validated merge participants must be idle"
        );
        self.dirty.extend([owner, merging]);

        info!(%transition, %owner, %merging, rank, duration, "merge started");
        self.outbox.push(CompositionBroadcast::MergeStarted {
            header,
            transition,
            owner,
            merging,
            duration,
        });

        Ok(Response::Started(Accepted {
            transition,
            spawned: None,
        }))
    }

    fn start_split(
        &mut self,
        from: PeerId,
        header: RequestHeader,
        owner: UnitId,
    ) -> Result<Response, Rejection> {
        let unit = self.usable(from, owner)?;
        if unit.rank != 1 {
            return Err(Rejection::NotSplittable {
                unit: owner,
                rank: unit.rank,
            });
        }

        let live = self.registry.count_owned_by(from);
        if live >= self.table.capacity {
            return Err(Rejection::CapacityReached {
                live,
                capacity: self.table.capacity,
            });
        }
        let duration = self
            .table
            .split_duration(1)
            .ok_or(Rejection::MissingRow(1))?;

        let transition = self.allocate_transition();
        let unit = self
            .registry
            .get_mut(owner)
            .ok_or(Rejection::UnknownUnit(owner))?;
        let locked = unit.try_lock(transition, TransitionKind::Split);
        debug_assert!(locked, "validated split owner must be idle");
        let mut twin = unit.split_twin();
        let locked = twin.try_lock(transition, TransitionKind::Split);
        debug_assert!(locked, "a fresh twin starts idle");

        let position = self.controller.position(owner).unwrap_or(Vec3::ZERO);
        let scale = self.controller.scale(owner).unwrap_or(Vec3::ONE);
        let split = self.registry.spawn(twin.clone());
        self.controller.spawn(split, position, scale);
        self.dirty.insert(owner);

        let angle: f32 = self.rng.gen_range(-180.0..180.0);
        let radius = self.config.spawn_radius;

        info!(%transition, %owner, %split, angle, "split started");
        self.outbox.push(CompositionBroadcast::SplitStarted {
            header,
            transition,
            owner,
            split: UnitSnapshot {
                id: split,
                unit: twin,
                position,
                scale,
            },
            angle,
            radius,
            duration,
        });

        Ok(Response::Started(Accepted {
            transition,
            spawned: Some(split),
        }))
    }

    /// Resolves a unit the requester may put into a new transition.
    fn usable(&self, from: PeerId, id: UnitId) -> Result<&Unit, Rejection> {
        let unit = self.registry.get(id).ok_or(Rejection::UnknownUnit(id))?;
        if unit.owner != from {
            return Err(Rejection::NotOwner {
                unit: id,
                owner: unit.owner,
                requester: from,
            });
        }
        if let Some(transition) = unit.lock.holder() {
            return Err(Rejection::Locked { unit: id, transition });
        }
        Ok(unit)
    }

    fn allocate_transition(&mut self) -> TransitionId {
        let id = TransitionId(self.next_transition);
        self.next_transition += 1;
        id
    }

    // ========================================================================
    // END
    // ========================================================================

    fn check_end(&self, from: PeerId, transition: TransitionId, owner: UnitId) -> Result<(), Rejection> {
        if transition.0 == 0 || transition.0 >= self.next_transition {
            return Err(Rejection::UnknownTransition(transition));
        }
        match self.registry.get(owner) {
            Some(unit) if unit.owner != from => Err(Rejection::NotOwner {
                unit: owner,
                owner: unit.owner,
                requester: from,
            }),
            _ => Ok(()),
        }
    }

    fn end_merge(
        &mut self,
        from: PeerId,
        header: RequestHeader,
        transition: TransitionId,
        owner: UnitId,
        merging: UnitId,
    ) -> Result<Response, Rejection> {
        self.check_end(from, transition, owner)?;

        let commit = commit_merge(&mut self.registry, &self.table, transition, owner, merging);
        if commit.outcome == CommitOutcome::AlreadyCommitted {
            debug!(%transition, "duplicate merge end ignored");
            return Ok(Response::Committed(commit.outcome));
        }

        if let Some(destroyed) = commit.destroyed {
            self.controller.despawn(destroyed);
        }
        self.dirty.extend([owner, merging]);
        self.outbox.push(CompositionBroadcast::MergeEnded {
            header,
            transition,
            owner,
            destroyed: commit.destroyed,
        });

        Ok(Response::Committed(commit.outcome))
    }

    fn end_split(
        &mut self,
        from: PeerId,
        header: RequestHeader,
        transition: TransitionId,
        owner: UnitId,
        split: UnitId,
    ) -> Result<Response, Rejection> {
        self.check_end(from, transition, owner)?;

        let outcome = commit_split(&mut self.registry, transition, owner, split);
        if outcome == CommitOutcome::Unlocked {
            self.dirty.extend([owner, split]);
            self.outbox.push(CompositionBroadcast::SplitEnded {
                header,
                transition,
                owner,
                split,
            });
        } else {
            debug!(%transition, ?outcome, "split end changed nothing");
        }

        Ok(Response::Committed(outcome))
    }

    // ========================================================================
    // REPLICATION
    // ========================================================================

    /// Queues a state snapshot for every unit changed since the last pass.
    fn replicate(&mut self) {
        for id in std::mem::take(&mut self.dirty) {
            let Some(unit) = self.registry.get(id) else {
                continue;
            };
            self.outbox.push(CompositionBroadcast::UnitState(UnitSnapshot {
                id,
                unit: unit.clone(),
                position: self.controller.position(id).unwrap_or(Vec3::ZERO),
                scale: self.controller.scale(id).unwrap_or(Vec3::ONE),
            }));
            self.stats.replicated += 1;
        }
    }

    fn flush(&mut self) -> EngineResult<usize> {
        let sent = self.outbox.len();
        for broadcast in self.outbox.drain(..) {
            self.transport.broadcast_to_all(broadcast)?;
        }
        Ok(sent)
    }
}

fn check_header(from: PeerId, header: RequestHeader) -> Result<(), Rejection> {
    if header.authority != from {
        return Err(Rejection::AuthorityMismatch {
            claimed: header.authority,
            sender: from,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockEntityController;
    use crate::ledger::LedgerId;
    use crate::transport::{AuthorityLink, LoopbackNetwork, PeerLink, PeerTransport};

    const ALICE: PeerId = PeerId(1);
    const BOB: PeerId = PeerId(2);

    struct Fixture {
        authority: Authority<MockEntityController, AuthorityLink>,
        alice: PeerLink,
        _network: LoopbackNetwork,
    }

    fn fixture(table: AttributeTable) -> Fixture {
        let network = LoopbackNetwork::new();
        let alice = network.connect_peer(ALICE);
        let authority = Authority::new(
            EngineConfig::default(),
            Arc::new(table),
            MockEntityController::new(),
            network.authority_link(),
        );
        Fixture {
            authority,
            alice,
            _network: network,
        }
    }

    fn header(peer: PeerId) -> RequestHeader {
        RequestHeader {
            ledger: LedgerId(peer.0),
            authority: peer,
        }
    }

    fn spawn(fx: &mut Fixture, owner: PeerId, rank: u32) -> UnitId {
        fx.authority
            .spawn_unit(Unit::new(owner).with_rank(rank), Vec3::ZERO, Vec3::ONE)
    }

    fn merge(owner: UnitId, merging: UnitId) -> CompositionRequest {
        CompositionRequest::Merge {
            header: header(ALICE),
            owner,
            merging,
        }
    }

    #[test]
    fn test_merge_locks_both_units() {
        let mut fx = fixture(AttributeTable::default());
        let a = spawn(&mut fx, ALICE, 2);
        let b = spawn(&mut fx, ALICE, 2);

        let response = fx.authority.handle_request(ALICE, merge(a, b)).unwrap();
        let Response::Started(accepted) = response else {
            panic!("expected start, got {response:?}");
        };

        let registry = fx.authority.registry();
        assert_eq!(registry.get(a).unwrap().lock.holder(), Some(accepted.transition));
        assert!(registry.get(b).unwrap().is_merging());

        // A second request for either unit loses
        let c = spawn(&mut fx, ALICE, 2);
        assert_eq!(
            fx.authority.handle_request(ALICE, merge(c, b)),
            Err(Rejection::Locked {
                unit: b,
                transition: accepted.transition
            })
        );
    }

    #[test]
    fn test_merge_validation() {
        let mut fx = fixture(AttributeTable::default());
        let a = spawn(&mut fx, ALICE, 1);
        let b = spawn(&mut fx, ALICE, 2);
        let foreign = spawn(&mut fx, BOB, 1);

        assert_eq!(
            fx.authority.handle_request(ALICE, merge(a, b)),
            Err(Rejection::RankMismatch {
                owner_rank: 1,
                merging_rank: 2
            })
        );
        assert_eq!(
            fx.authority.handle_request(ALICE, merge(a, a)),
            Err(Rejection::SelfMerge(a))
        );
        assert!(matches!(
            fx.authority.handle_request(ALICE, merge(a, foreign)),
            Err(Rejection::NotOwner { .. })
        ));

        // Header claiming somebody else's domain
        assert_eq!(
            fx.authority.handle_request(BOB, merge(a, b)),
            Err(Rejection::AuthorityMismatch {
                claimed: ALICE,
                sender: BOB
            })
        );

        fx.authority.tick().unwrap();
        assert!(fx.alice.drain_broadcasts().iter().all(|b| matches!(b, CompositionBroadcast::UnitState(_))));
        assert_eq!(fx.authority.stats().rejected, 4);
        assert_eq!(fx.authority.stats().accepted, 0);
    }

    #[test]
    fn test_split_spawns_locked_twin() {
        let mut fx = fixture(AttributeTable::default());
        let a = spawn(&mut fx, ALICE, 1);
        fx.authority.tick().unwrap();
        fx.alice.drain_broadcasts();

        let request = CompositionRequest::Split {
            header: header(ALICE),
            unit: a,
        };
        let Ok(Response::Started(accepted)) = fx.authority.handle_request(ALICE, request) else {
            panic!("split rejected");
        };
        let twin = accepted.spawned.unwrap();

        let registry = fx.authority.registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).unwrap().is_splitting());
        assert!(registry.get(twin).unwrap().is_splitting());
        assert_eq!(registry.get(twin).unwrap().owner, ALICE);
        assert!(fx.authority.controller().is_spawned(twin));

        fx.authority.tick().unwrap();
        let broadcasts = fx.alice.drain_broadcasts();
        let CompositionBroadcast::SplitStarted { angle, split, .. } = &broadcasts[0] else {
            panic!("expected split broadcast first, got {broadcasts:?}");
        };
        assert!((-180.0..180.0).contains(angle));
        assert_eq!(split.id, twin);
    }

    #[test]
    fn test_split_capacity_and_rank() {
        let mut table = AttributeTable::default();
        table.capacity = 2;
        let mut fx = fixture(table);
        let a = spawn(&mut fx, ALICE, 1);
        let strong = spawn(&mut fx, ALICE, 3);

        let split = |unit| CompositionRequest::Split {
            header: header(ALICE),
            unit,
        };
        assert_eq!(
            fx.authority.handle_request(ALICE, split(strong)),
            Err(Rejection::NotSplittable { unit: strong, rank: 3 })
        );
        assert_eq!(
            fx.authority.handle_request(ALICE, split(a)),
            Err(Rejection::CapacityReached { live: 2, capacity: 2 })
        );
    }

    #[test]
    fn test_end_merge_commits_once() {
        let mut fx = fixture(AttributeTable::default());
        let a = spawn(&mut fx, ALICE, 2);
        let b = spawn(&mut fx, ALICE, 2);
        let Ok(Response::Started(accepted)) = fx.authority.handle_request(ALICE, merge(a, b)) else {
            panic!("merge rejected");
        };

        let end = CompositionRequest::EndMerge {
            header: header(ALICE),
            transition: accepted.transition,
            owner: a,
            merging: b,
        };
        assert_eq!(
            fx.authority.handle_request(ALICE, end.clone()),
            Ok(Response::Committed(CommitOutcome::Merged { rank: 3 }))
        );
        assert_eq!(
            fx.authority.handle_request(ALICE, end),
            Ok(Response::Committed(CommitOutcome::AlreadyCommitted))
        );

        assert_eq!(fx.authority.registry().get(a).unwrap().rank, 3);
        assert!(!fx.authority.registry().contains(b));
        assert!(!fx.authority.controller().is_spawned(b));
        assert_eq!(fx.authority.stats().commits, 1);
        assert_eq!(fx.authority.stats().duplicate_commits, 1);
    }

    #[test]
    fn test_end_for_unknown_transition() {
        let mut fx = fixture(AttributeTable::default());
        let a = spawn(&mut fx, ALICE, 1);
        let b = spawn(&mut fx, ALICE, 1);
        let end = CompositionRequest::EndSplit {
            header: header(ALICE),
            transition: TransitionId(42),
            owner: a,
            split: b,
        };
        assert_eq!(
            fx.authority.handle_request(ALICE, end),
            Err(Rejection::UnknownTransition(TransitionId(42)))
        );
    }

    #[test]
    fn test_split_angles_are_seeded() {
        let angles = || {
            let mut fx = fixture(AttributeTable::default());
            (0..4)
                .map(|_| {
                    let a = spawn(&mut fx, ALICE, 1);
                    let request = CompositionRequest::Split {
                        header: header(ALICE),
                        unit: a,
                    };
                    fx.authority.handle_request(ALICE, request).unwrap();
                    fx.authority.tick().unwrap();
                    fx.alice
                        .drain_broadcasts()
                        .into_iter()
                        .find_map(|b| match b {
                            CompositionBroadcast::SplitStarted { angle, .. } => Some(angle),
                            _ => None,
                        })
                        .unwrap()
                })
                .collect::<Vec<f32>>()
        };
        assert_eq!(angles(), angles());
    }
}
