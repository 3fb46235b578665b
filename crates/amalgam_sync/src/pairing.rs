//! # Pairing Resolver
//!
//! Turns the local selection into merge pairs and split candidates.
//!
//! Both resolvers are pure: they read the replica registry and return
//! proposals. The caller decides whether to send requests, and the
//! authority re-validates everything anyway.
//!
//! ## Merge Pairing
//!
//! Greedy, in selection order: each unused unit pairs with the first later
//! unused unit of the same rank. This is not a maximum matching. For
//! `[r1, r2, r1, r2]` it yields `(0, 2)` and `(1, 3)`; for `[r1, r1, r1]` the
//! last unit is left over.

use std::collections::HashSet;

use amalgam_core::{UnitId, UnitRegistry};

/// A proposed merge: `owner` survives, `merging` is destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MergePair {
    /// Unit that survives with the raised rank.
    pub owner: UnitId,
    /// Unit that is consumed.
    pub merging: UnitId,
}

/// Proposes disjoint equal-rank pairs from `selection`.
///
/// Handles that no longer resolve are skipped, as are repeated handles.
#[must_use]
pub fn resolve_pairs(selection: &[UnitId], registry: &UnitRegistry) -> Vec<MergePair> {
    let ranks: Vec<Option<u32>> = selection
        .iter()
        .map(|id| registry.get(*id).map(|unit| unit.rank))
        .collect();

    let mut used: HashSet<UnitId> = HashSet::with_capacity(selection.len());
    let mut pairs = Vec::with_capacity(selection.len() / 2);

    for (i, &owner) in selection.iter().enumerate() {
        let Some(rank) = ranks[i] else { continue };
        if used.contains(&owner) {
            continue;
        }

        let partner = selection
            .iter()
            .enumerate()
            .skip(i + 1)
            .find(|&(j, &candidate)| {
                candidate != owner && !used.contains(&candidate) && ranks[j] == Some(rank)
            })
            .map(|(_, &candidate)| candidate);

        if let Some(merging) = partner {
            used.insert(owner);
            used.insert(merging);
            pairs.push(MergePair { owner, merging });
        }
    }

    pairs
}

/// Proposes rank-1 units from `selection` to split.
///
/// `live_count` is the number of units the player owns now. Every emitted
/// candidate reserves one slot, so the result never pushes the player past
/// `capacity`.
#[must_use]
pub fn resolve_split_candidates(
    selection: &[UnitId],
    registry: &UnitRegistry,
    live_count: usize,
    capacity: usize,
) -> Vec<UnitId> {
    let mut projected = live_count;
    let mut seen = HashSet::with_capacity(selection.len());
    let mut candidates = Vec::new();

    for &id in selection {
        if projected >= capacity {
            break;
        }
        if !seen.insert(id) {
            continue;
        }
        if registry.get(id).is_some_and(|unit| unit.rank == 1) {
            candidates.push(id);
            projected += 1;
        }
    }

    candidates
}
