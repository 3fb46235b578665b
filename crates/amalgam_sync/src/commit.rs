//! # Attribute Commit
//!
//! Authority-only recomputation run when a requester reports that its
//! transition animation finished.
//!
//! ## Exactly Once
//!
//! A commit only acts while the owner is still locked by the transition,
//! and it releases that lock as its last step. A redelivered end request
//! finds the lock gone and returns [`CommitOutcome::AlreadyCommitted`]. The
//! rank increment is additionally guarded by `previous_rank == rank`.

use amalgam_core::{AttributeRow, AttributeTable, TransitionId, UnitId, UnitRegistry};
use tracing::{info, warn};

/// What a commit did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The owner was upgraded to `rank`.
    Merged {
        /// New rank of the owner.
        rank: u32,
    },
    /// Rank was raised but the table has no row for it; stats unchanged.
    MissingRow {
        /// Rank without a row.
        rank: u32,
    },
    /// Split locks were released.
    Unlocked,
    /// Nothing held by this transition remained; a previous commit ran.
    AlreadyCommitted,
    /// The owner no longer exists. Any lock on the partner was released.
    OwnerGone,
}

/// Result of a merge commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeCommit {
    /// What happened to the owner.
    pub outcome: CommitOutcome,
    /// Merging unit destroyed by this commit.
    pub destroyed: Option<UnitId>,
}

/// Commits a merge: raises the owner's rank, destroys the merging unit and
/// applies the new rank's multipliers.
pub fn commit_merge(
    registry: &mut UnitRegistry,
    table: &AttributeTable,
    transition: TransitionId,
    owner: UnitId,
    merging: UnitId,
) -> MergeCommit {
    let owner_locked = registry
        .get(owner)
        .map(|u| u.lock.holder() == Some(transition));

    let merging_locked = registry
        .get(merging)
        .is_some_and(|u| u.lock.holder() == Some(transition));

    match owner_locked {
        None => {
            warn!(%transition, %owner, "merge owner gone before commit");
            if let Some(unit) = registry.get_mut(merging) {
                unit.release(transition);
            }
            return MergeCommit {
                outcome: CommitOutcome::OwnerGone,
                destroyed: None,
            };
        }
        Some(false) => {
            return MergeCommit {
                outcome: CommitOutcome::AlreadyCommitted,
                destroyed: None,
            };
        }
        Some(true) => {}
    }

    let destroyed = if merging_locked {
        registry.despawn(merging).map(|_| merging)
    } else {
        None
    };

    let Some(unit) = registry.get_mut(owner) else {
        return MergeCommit {
            outcome: CommitOutcome::OwnerGone,
            destroyed,
        };
    };

    if unit.previous_rank == unit.rank {
        unit.rank += 1;
    }
    let rank = unit.rank;

    let outcome = if let Some(row) = table.row(rank) {
        unit.max_health = AttributeRow::scale_floor(unit.max_health, row.health);
        unit.current_health = AttributeRow::scale_floor(unit.current_health, row.health);
        unit.attack_power = AttributeRow::scale(unit.attack_power, row.attack);
        unit.speed = AttributeRow::scale(unit.speed, row.speed);
        unit.attack_cooldown *= table.attack_cooldown_factor;
        info!(%transition, %owner, rank, health = unit.current_health, "merge committed");
        CommitOutcome::Merged { rank }
    } else {
        warn!(%transition, %owner, rank, "no attribute row for rank, stats left unchanged");
        CommitOutcome::MissingRow { rank }
    };

    unit.previous_rank = unit.rank;
    unit.release(transition);

    MergeCommit { outcome, destroyed }
}

/// Commits a split: releases the locks on both units.
pub fn commit_split(
    registry: &mut UnitRegistry,
    transition: TransitionId,
    owner: UnitId,
    split: UnitId,
) -> CommitOutcome {
    let owner_present = registry.contains(owner);
    let released_owner = registry
        .get_mut(owner)
        .is_some_and(|u| u.release(transition));
    let released_split = registry
        .get_mut(split)
        .is_some_and(|u| u.release(transition));

    if released_owner || released_split {
        info!(%transition, %owner, %split, "split committed");
        CommitOutcome::Unlocked
    } else if owner_present {
        CommitOutcome::AlreadyCommitted
    } else {
        CommitOutcome::OwnerGone
    }
}
