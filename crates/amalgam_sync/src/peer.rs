//! # Peer
//!
//! One participant's view of the session: a replica registry, one ledger per
//! authority domain, the live pool and the collaborators injected through
//! [`PeerBuilder`].
//!
//! ## Tick Order
//!
//! ```text
//! 1. apply queued broadcasts   (replica + ledger inserts)
//! 2. advance every ledger      (one pass each)
//! 3. send end requests         (own ledger only)
//! ```
//!
//! Every ledger restores visuals locally when its groups finish, but only
//! the ledger whose domain is this peer reports completion to the
//! authority. Observers never commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use amalgam_core::{
    AttributeTable, LockState, PeerId, TransitionId, TransitionKind, UnitId, UnitRegistry,
};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::controller::EntityController;
use crate::error::{EngineError, EngineResult};
use crate::group::{MergeGroup, SplitGroup, TransitionGroup};
use crate::ledger::{Completion, GroupLedger, LedgerId};
use crate::pairing::{resolve_pairs, resolve_split_candidates, MergePair};
use crate::protocol::{
    BroadcastOutcome, CompositionBroadcast, CompositionRequest, RequestHeader, UnitSnapshot,
};
use crate::selection::SelectionProvider;
use crate::transport::PeerTransport;

// ============================================================================
// LIVE POOL
// ============================================================================

/// Units that are settled in the scene and available to the player.
///
/// A split's twin joins only after the split completes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LivePool {
    units: Vec<UnitId>,
}

impl LivePool {
    /// Adds a unit. Returns `false` if it was already present.
    pub fn insert(&mut self, unit: UnitId) -> bool {
        if self.units.contains(&unit) {
            return false;
        }
        self.units.push(unit);
        true
    }

    /// Removes a unit. Returns `false` if it was not present.
    pub fn remove(&mut self, unit: UnitId) -> bool {
        let before = self.units.len();
        self.units.retain(|u| *u != unit);
        self.units.len() != before
    }

    /// True if the unit is in the pool.
    #[must_use]
    pub fn contains(&self, unit: UnitId) -> bool {
        self.units.contains(&unit)
    }

    /// Number of pooled units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True if the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Pooled units in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.units.iter().copied()
    }
}

// ============================================================================
// PEER
// ============================================================================

/// What one peer tick did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeerTickReport {
    /// Outcome of every broadcast applied, in arrival order.
    pub applied: Vec<BroadcastOutcome>,
    /// Transitions that finished in any ledger.
    pub completed: Vec<Completion>,
    /// End requests sent to the authority.
    pub end_requests: usize,
}

/// A session participant.
pub struct Peer<S, C, T>
where
    S: SelectionProvider,
    C: EntityController,
    T: PeerTransport,
{
    id: PeerId,
    ledger: LedgerId,
    config: EngineConfig,
    table: Arc<AttributeTable>,
    selection: S,
    controller: C,
    transport: T,
    registry: UnitRegistry,
    ledgers: BTreeMap<LedgerId, GroupLedger>,
    pool: LivePool,
}

impl<S, C, T> Peer<S, C, T>
where
    S: SelectionProvider,
    C: EntityController,
    T: PeerTransport,
{
    /// Peer identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// This peer's own ledger.
    #[inline]
    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        self.ledger
    }

    /// Header stamped on this peer's requests.
    #[must_use]
    pub const fn header(&self) -> RequestHeader {
        RequestHeader {
            ledger: self.ledger,
            authority: self.id,
        }
    }

    /// Replica registry.
    #[must_use]
    pub const fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Local scene.
    #[must_use]
    pub const fn controller(&self) -> &C {
        &self.controller
    }

    /// Local scene, mutably.
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Selection provider.
    #[must_use]
    pub const fn selection(&self) -> &S {
        &self.selection
    }

    /// Selection provider, mutably.
    pub fn selection_mut(&mut self) -> &mut S {
        &mut self.selection
    }

    /// Link to the authority.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Settled units.
    #[must_use]
    pub const fn pool(&self) -> &LivePool {
        &self.pool
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Looks up a ledger.
    #[must_use]
    pub fn ledger(&self, id: LedgerId) -> Option<&GroupLedger> {
        self.ledgers.get(&id)
    }

    /// Every ledger on this peer.
    pub fn ledgers(&self) -> impl Iterator<Item = &GroupLedger> {
        self.ledgers.values()
    }

    /// Groups in flight across all ledgers.
    #[must_use]
    pub fn active_transitions(&self) -> usize {
        self.ledgers.values().map(GroupLedger::len).sum()
    }

    /// Registers a mirror ledger for another participant's transitions.
    /// Returns `false` if the id is taken.
    pub fn mirror_ledger(&mut self, id: LedgerId, authority: PeerId) -> bool {
        if self.ledgers.contains_key(&id) {
            return false;
        }
        self.ledgers.insert(id, GroupLedger::new(id, authority));
        true
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    /// Pairs the current selection and asks the authority to merge each pair.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the authority is gone.
    pub fn request_merges(&mut self) -> EngineResult<Vec<MergePair>> {
        let selection = self.owned_selection();
        let pairs = resolve_pairs(&selection, &self.registry);

        for pair in &pairs {
            debug!(peer = %self.id, owner = %pair.owner, merging = %pair.merging, "requesting merge");
            self.transport.send_to_authority(CompositionRequest::Merge {
                header: self.header(),
                owner: pair.owner,
                merging: pair.merging,
            })?;
        }
        Ok(pairs)
    }

    /// Asks the authority to split every eligible selected unit.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the authority is gone.
    pub fn request_splits(&mut self) -> EngineResult<Vec<UnitId>> {
        let selection = self.owned_selection();
        let live = self.registry.count_owned_by(self.id);
        let candidates =
            resolve_split_candidates(&selection, &self.registry, live, self.table.capacity);

        for &unit in &candidates {
            debug!(peer = %self.id, %unit, "requesting split");
            self.transport.send_to_authority(CompositionRequest::Split {
                header: self.header(),
                unit,
            })?;
        }
        Ok(candidates)
    }

    fn owned_selection(&self) -> Vec<UnitId> {
        self.selection
            .selected()
            .into_iter()
            .filter(|id| self.registry.get(*id).is_some_and(|u| u.owner == self.id))
            .collect()
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// Applies pending broadcasts, advances every ledger by `dt` seconds and
    /// reports finished own transitions to the authority.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if an end request cannot be sent.
    pub fn tick(&mut self, dt: f64) -> EngineResult<PeerTickReport> {
        let mut report = PeerTickReport::default();

        for broadcast in self.transport.drain_broadcasts() {
            let outcome = self.receive(broadcast);
            report.applied.push(outcome);
        }

        let mut ends = Vec::new();
        for ledger in self.ledgers.values_mut() {
            let completions = ledger.advance(dt, &mut self.registry, &mut self.controller);
            if ledger.authority() == self.id {
                let header = RequestHeader {
                    ledger: ledger.id(),
                    authority: self.id,
                };
                ends.extend(completions.iter().map(|c| end_request(header, c)));
            }
            report.completed.extend(completions);
        }

        for request in ends {
            self.transport.send_to_authority(request)?;
            report.end_requests += 1;
        }

        Ok(report)
    }

    /// Applies one broadcast to the replica and the ledgers.
    pub fn receive(&mut self, broadcast: CompositionBroadcast) -> BroadcastOutcome {
        match broadcast {
            CompositionBroadcast::MergeStarted {
                header,
                transition,
                owner,
                merging,
                duration,
            } => self.on_merge_started(header, transition, owner, merging, duration),
            CompositionBroadcast::SplitStarted {
                header,
                transition,
                owner,
                split,
                angle,
                radius,
                duration,
            } => self.on_split_started(header, transition, owner, split, angle, radius, duration),
            CompositionBroadcast::MergeEnded {
                transition,
                owner,
                destroyed,
                ..
            } => self.on_merge_ended(transition, owner, destroyed),
            CompositionBroadcast::SplitEnded {
                transition,
                owner,
                split,
                ..
            } => self.on_split_ended(transition, owner, split),
            CompositionBroadcast::UnitState(snapshot) => self.on_unit_state(snapshot),
        }
    }

    /// Finds the ledger a broadcast belongs in, or says why it is ignored.
    fn route(&self, header: RequestHeader, transition: TransitionId) -> Result<(), BroadcastOutcome> {
        let Some(ledger) = self.ledgers.get(&header.ledger) else {
            debug!(peer = %self.id, ledger = %header.ledger, %transition, "no such ledger, broadcast ignored");
            return Err(BroadcastOutcome::UnknownLedger(header.ledger));
        };
        if ledger.authority() != header.authority {
            debug!(
                peer = %self.id,
                ledger = %header.ledger,
                expected = %ledger.authority(),
                got = %header.authority,
                "authority mismatch, broadcast ignored"
            );
            return Err(BroadcastOutcome::AuthorityMismatch {
                expected: ledger.authority(),
                got: header.authority,
            });
        }
        if ledger.has_seen(transition) {
            return Err(BroadcastOutcome::Duplicate);
        }
        Ok(())
    }

    fn require(&self, units: [UnitId; 2], transition: TransitionId) -> Result<(), BroadcastOutcome> {
        match units.into_iter().find(|u| !self.registry.contains(*u)) {
            Some(missing) => {
                warn!(peer = %self.id, %transition, unit = %missing, "participant missing from replica");
                Err(BroadcastOutcome::MissingParticipant(missing))
            }
            None => Ok(()),
        }
    }

    fn lock_replicas(&mut self, units: [UnitId; 2], transition: TransitionId, kind: TransitionKind) {
        for unit in units {
            if let Some(u) = self.registry.get_mut(unit) {
                u.lock = LockState::Locked { transition, kind };
            }
            self.selection.deselect(unit);
        }
    }

    fn insert_group(&mut self, ledger: LedgerId, group: TransitionGroup) -> BroadcastOutcome {
        let Some(target) = self.ledgers.get_mut(&ledger) else {
            return BroadcastOutcome::UnknownLedger(ledger);
        };
        if target.insert(group) {
            BroadcastOutcome::Inserted(ledger)
        } else {
            BroadcastOutcome::Duplicate
        }
    }

    fn on_merge_started(
        &mut self,
        header: RequestHeader,
        transition: TransitionId,
        owner: UnitId,
        merging: UnitId,
        duration: f32,
    ) -> BroadcastOutcome {
        if let Err(outcome) = self
            .route(header, transition)
            .and_then(|()| self.require([owner, merging], transition))
        {
            return outcome;
        }

        self.lock_replicas([owner, merging], transition, TransitionKind::Merge);
        let group = MergeGroup::begin(
            transition,
            owner,
            merging,
            duration,
            self.config.scaling_value,
            &mut self.registry,
            &mut self.controller,
        );
        info!(peer = %self.id, %transition, %owner, %merging, "merge group inserted");
        self.insert_group(header.ledger, TransitionGroup::Merge(group))
    }

    #[allow(clippy::too_many_arguments)]
    fn on_split_started(
        &mut self,
        header: RequestHeader,
        transition: TransitionId,
        owner: UnitId,
        split: UnitSnapshot,
        angle: f32,
        radius: f32,
        duration: f32,
    ) -> BroadcastOutcome {
        // The twin exists on the authority whether or not a ledger here
        // animates it.
        if !self.registry.contains(split.id)
            && self.registry.insert_replica(split.id, split.unit.clone())
        {
            self.controller.spawn(split.id, split.position, split.scale);
        }

        if let Err(outcome) = self
            .route(header, transition)
            .and_then(|()| self.require([owner, split.id], transition))
        {
            return outcome;
        }

        self.lock_replicas([owner, split.id], transition, TransitionKind::Split);
        let group = SplitGroup::begin(
            transition,
            owner,
            split.id,
            duration,
            angle,
            radius,
            &mut self.registry,
            &mut self.controller,
        );
        info!(peer = %self.id, %transition, %owner, split = %split.id, angle, "split group inserted");
        self.insert_group(header.ledger, TransitionGroup::Split(group))
    }

    fn on_merge_ended(
        &mut self,
        transition: TransitionId,
        owner: UnitId,
        destroyed: Option<UnitId>,
    ) -> BroadcastOutcome {
        let mut changed = false;

        if let Some(gone) = destroyed {
            if self.registry.despawn(gone).is_some() {
                self.controller.despawn(gone);
                self.pool.remove(gone);
                self.selection.deselect(gone);
                changed = true;
            }
        }

        if self.registry.get_mut(owner).is_some_and(|u| u.release(transition)) {
            self.controller.resume_motion(owner);
            self.controller.reset_path(owner);
            changed = true;
        }

        if changed {
            BroadcastOutcome::Ended
        } else {
            BroadcastOutcome::Duplicate
        }
    }

    fn on_split_ended(&mut self, transition: TransitionId, owner: UnitId, split: UnitId) -> BroadcastOutcome {
        let mut changed = false;

        for unit in [owner, split] {
            if self.registry.get_mut(unit).is_some_and(|u| u.release(transition)) {
                self.controller.resume_motion(unit);
                changed = true;
            }
            if self.registry.contains(unit) && self.pool.insert(unit) {
                changed = true;
            }
        }

        if changed {
            BroadcastOutcome::Ended
        } else {
            BroadcastOutcome::Duplicate
        }
    }

    fn on_unit_state(&mut self, snapshot: UnitSnapshot) -> BroadcastOutcome {
        let UnitSnapshot {
            id,
            mut unit,
            position,
            scale,
        } = snapshot;

        if let Some(local) = self.registry.get_mut(id) {
            unit.selected = local.selected;
            *local = unit;
            return BroadcastOutcome::Replicated;
        }

        if !self.registry.insert_replica(id, unit) {
            return BroadcastOutcome::Duplicate;
        }
        self.controller.spawn(id, position, scale);
        self.pool.insert(id);
        BroadcastOutcome::Replicated
    }
}

fn end_request(header: RequestHeader, completion: &Completion) -> CompositionRequest {
    match completion.kind {
        TransitionKind::Merge => CompositionRequest::EndMerge {
            header,
            transition: completion.transition,
            owner: completion.owner,
            merging: completion.partner,
        },
        TransitionKind::Split => CompositionRequest::EndSplit {
            header,
            transition: completion.transition,
            owner: completion.owner,
            split: completion.partner,
        },
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`Peer`] from its collaborators.
///
/// Selection, controller, transport and attribute table are required.
pub struct PeerBuilder<S, C, T> {
    id: PeerId,
    ledger: Option<LedgerId>,
    config: EngineConfig,
    table: Option<Arc<AttributeTable>>,
    selection: Option<S>,
    controller: Option<C>,
    transport: Option<T>,
}

impl<S, C, T> PeerBuilder<S, C, T>
where
    S: SelectionProvider,
    C: EntityController,
    T: PeerTransport,
{
    /// Starts a builder for peer `id`.
    #[must_use]
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            ledger: None,
            config: EngineConfig::default(),
            table: None,
            selection: None,
            controller: None,
            transport: None,
        }
    }

    /// Sets the own ledger id (defaults to the peer id's number).
    #[must_use]
    pub fn ledger(mut self, ledger: LedgerId) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets engine settings.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the attribute table.
    #[must_use]
    pub fn table(mut self, table: Arc<AttributeTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Sets the selection provider.
    #[must_use]
    pub fn selection(mut self, selection: S) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Sets the entity controller.
    #[must_use]
    pub fn controller(mut self, controller: C) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Sets the transport.
    #[must_use]
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the peer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingCollaborator`] naming the first missing
    /// piece, or [`EngineError::InvalidConfig`] for bad settings.
    pub fn build(self) -> EngineResult<Peer<S, C, T>> {
        let id = self.id;
        let missing = |what: &'static str| {
            error!(peer = %id, collaborator = what, "cannot build peer");
            EngineError::MissingCollaborator(what)
        };

        let selection = self.selection.ok_or_else(|| missing("selection provider"))?;
        let controller = self.controller.ok_or_else(|| missing("entity controller"))?;
        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let table = self.table.ok_or_else(|| missing("attribute table"))?;
        self.config.validate()?;

        let registry = UnitRegistry::with_capacity(table.capacity);
        let ledger = self.ledger.unwrap_or(LedgerId(id.0));
        let mut ledgers = BTreeMap::new();
        ledgers.insert(ledger, GroupLedger::new(ledger, id));

        info!(peer = %id, %ledger, "peer ready");
        Ok(Peer {
            id,
            ledger,
            config: self.config,
            table,
            selection,
            controller,
            transport,
            registry,
            ledgers,
            pool: LivePool::default(),
        })
    }
}
