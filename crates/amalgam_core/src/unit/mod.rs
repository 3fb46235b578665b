//! # Units
//!
//! A unit is the thing that merges and splits. This module holds its
//! replicated attributes and the lock that keeps it in at most one
//! transition at a time.

mod entity;
mod registry;

use serde::{Deserialize, Serialize};

pub use entity::UnitId;
pub use registry::UnitRegistry;

/// Identity of a peer in the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Identity of one in-flight merge or split, assigned by the authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub u64);

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Which composition operation holds a lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Two units fusing into one.
    Merge,
    /// One unit fissioning into two.
    Split,
}

/// Exclusion state of a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// Free to join a transition.
    #[default]
    Idle,
    /// Held by an in-flight transition.
    Locked {
        /// The transition holding the lock.
        transition: TransitionId,
        /// What kind of transition it is.
        kind: TransitionKind,
    },
}

impl LockState {
    /// Returns the transition holding this lock, if any.
    #[must_use]
    pub const fn holder(self) -> Option<TransitionId> {
        match self {
            Self::Idle => None,
            Self::Locked { transition, .. } => Some(transition),
        }
    }

    /// Returns true if no transition holds the unit.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Replicated attributes of a unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// The peer that owns this unit and may request transitions for it.
    pub owner: PeerId,
    /// Power level. Merge raises it, split requires it to be 1.
    pub rank: u32,
    /// Rank at the last committed merge; closes the double-increment guard.
    pub previous_rank: u32,
    /// Current hit points.
    pub current_health: i32,
    /// Maximum hit points.
    pub max_health: i32,
    /// Attack power.
    pub attack_power: f32,
    /// Movement speed.
    pub speed: f32,
    /// Seconds between attacks.
    pub attack_cooldown: f32,
    /// Selected by its owner's selection.
    pub selected: bool,
    /// Walking towards a player-issued target.
    pub directed: bool,
    /// Team color index (0..3).
    pub team_color: u8,
    /// Team faction.
    pub team_faction: u8,
    /// Transition lock.
    pub lock: LockState,
}

impl Unit {
    /// Creates a fresh rank-1 unit owned by `owner`.
    #[must_use]
    pub fn new(owner: PeerId) -> Self {
        Self {
            owner,
            rank: 1,
            previous_rank: 1,
            current_health: 100,
            max_health: 100,
            attack_power: 1.0,
            speed: 3.5,
            attack_cooldown: 3.0,
            selected: false,
            directed: false,
            team_color: 0,
            team_faction: 0,
            lock: LockState::Idle,
        }
    }

    /// Sets rank (and previous rank, so the merge guard starts closed).
    #[must_use]
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self.previous_rank = rank;
        self
    }

    /// Sets current and max health.
    #[must_use]
    pub fn with_health(mut self, current: i32, max: i32) -> Self {
        self.current_health = current;
        self.max_health = max;
        self
    }

    /// Sets attack power.
    #[must_use]
    pub fn with_attack(mut self, attack_power: f32) -> Self {
        self.attack_power = attack_power;
        self
    }

    /// Sets movement speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Sets team color and faction.
    #[must_use]
    pub fn with_team(mut self, color: u8, faction: u8) -> Self {
        self.team_color = color % 3;
        self.team_faction = faction;
        self
    }

    /// True while a merge holds the unit.
    #[must_use]
    pub fn is_merging(&self) -> bool {
        matches!(self.lock, LockState::Locked { kind: TransitionKind::Merge, .. })
    }

    /// True while a split holds the unit.
    #[must_use]
    pub fn is_splitting(&self) -> bool {
        matches!(self.lock, LockState::Locked { kind: TransitionKind::Split, .. })
    }

    /// True while any transition holds the unit.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.lock.is_idle()
    }

    /// Takes the lock for `transition`. Fails if anything already holds it.
    pub fn try_lock(&mut self, transition: TransitionId, kind: TransitionKind) -> bool {
        if !self.lock.is_idle() {
            return false;
        }
        self.lock = LockState::Locked { transition, kind };
        true
    }

    /// Releases the lock if `transition` holds it.
    pub fn release(&mut self, transition: TransitionId) -> bool {
        if self.lock.holder() != Some(transition) {
            return false;
        }
        self.lock = LockState::Idle;
        true
    }

    /// `current / max` health, or `0.0` for a unit with no max health.
    #[must_use]
    pub fn health_ratio(&self) -> f32 {
        if self.max_health <= 0 {
            0.0
        } else {
            self.current_health as f32 / self.max_health as f32
        }
    }

    /// Builds the twin that a split spawns from this unit.
    ///
    /// Both units leave with health clamped to max and the directed flag
    /// cleared. The twin is never selected and starts unlocked; the caller
    /// assigns its lock.
    pub fn split_twin(&mut self) -> Self {
        self.current_health = self.current_health.min(self.max_health);
        self.directed = false;

        Self {
            selected: false,
            lock: LockState::Idle,
            ..self.clone()
        }
    }
}
