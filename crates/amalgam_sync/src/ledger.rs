//! # Group Ledger
//!
//! The set of transitions one peer is animating for one authority domain.
//!
//! ## Tick Pass
//!
//! ```text
//! for each group:
//!     elapsed >= 1 ──> mark for removal, finish once
//!     otherwise    ──> update(elapsed), elapsed += dt / duration
//! sweep marked groups
//! ```
//!
//! Removal is deferred to the end of the pass so the list is never mutated
//! while it is being walked.

use std::collections::HashSet;

use amalgam_core::{PeerId, TransitionId, TransitionKind, UnitId, UnitRegistry};
use serde::{Deserialize, Serialize};

use crate::controller::EntityController;
use crate::group::TransitionGroup;

/// Identity of a ledger within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerId(pub u32);

impl std::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ledger#{}", self.0)
    }
}

/// A transition that finished during a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    /// The finished transition.
    pub transition: TransitionId,
    /// Merge or split.
    pub kind: TransitionKind,
    /// Surviving / splitting unit.
    pub owner: UnitId,
    /// Merging unit or spawned twin.
    pub partner: UnitId,
}

/// Active transitions for one authority domain on one peer.
#[derive(Clone, Debug)]
pub struct GroupLedger {
    id: LedgerId,
    authority: PeerId,
    groups: Vec<TransitionGroup>,
    pending_removal: HashSet<TransitionId>,
    /// Highest transition ever inserted. Ids are allocated in increasing
    /// order and each inbox is FIFO, so anything at or below it is a replay.
    newest: Option<TransitionId>,
}

impl GroupLedger {
    /// Creates an empty ledger for `authority`'s transitions.
    #[must_use]
    pub fn new(id: LedgerId, authority: PeerId) -> Self {
        Self {
            id,
            authority,
            groups: Vec::new(),
            pending_removal: HashSet::new(),
            newest: None,
        }
    }

    /// Ledger identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> LedgerId {
        self.id
    }

    /// Authority domain this ledger accepts groups for.
    #[inline]
    #[must_use]
    pub const fn authority(&self) -> PeerId {
        self.authority
    }

    /// Number of active groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Looks up an active group.
    #[must_use]
    pub fn get(&self, transition: TransitionId) -> Option<&TransitionGroup> {
        self.groups.iter().find(|g| g.transition() == transition)
    }

    /// True if the transition is active or already finished here.
    #[must_use]
    pub fn has_seen(&self, transition: TransitionId) -> bool {
        self.newest.is_some_and(|newest| transition <= newest)
    }

    /// Active groups in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TransitionGroup> {
        self.groups.iter()
    }

    /// Adds a group. Returns `false` for a transition this ledger has
    /// already seen, so redelivered broadcasts are harmless.
    pub fn insert(&mut self, group: TransitionGroup) -> bool {
        if self.has_seen(group.transition()) {
            return false;
        }
        self.newest = Some(group.transition());
        self.groups.push(group);
        true
    }

    /// Runs one tick pass over every group and sweeps finished ones.
    ///
    /// Returns the transitions that completed during this pass.
    pub fn advance(
        &mut self,
        dt: f64,
        registry: &mut UnitRegistry,
        controller: &mut dyn EntityController,
    ) -> Vec<Completion> {
        let mut completions = Vec::new();

        for group in &mut self.groups {
            if group.progress().is_complete() {
                if self.pending_removal.insert(group.transition()) {
                    group.finish(controller);
                    let [owner, partner] = group.participants();
                    completions.push(Completion {
                        transition: group.transition(),
                        kind: group.kind(),
                        owner,
                        partner,
                    });
                }
                continue;
            }

            group.update(registry, controller);
            group.progress_mut().advance(dt);
        }

        if !self.pending_removal.is_empty() {
            let pending = &self.pending_removal;
            self.groups.retain(|g| !pending.contains(&g.transition()));
            self.pending_removal.clear();
        }

        completions
    }
}
