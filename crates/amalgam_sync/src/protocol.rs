//! # Composition Protocol Messages
//!
//! ## Request (peer -> authority)
//!
//! | Message    | Payload                           |
//! |------------|-----------------------------------|
//! | `Merge`    | header, owner, merging            |
//! | `Split`    | header, unit                      |
//! | `EndMerge` | header, transition, owner, merging|
//! | `EndSplit` | header, transition, owner, split  |
//!
//! ## Broadcast (authority -> every peer)
//!
//! | Message        | Effect on a peer                                 |
//! |----------------|--------------------------------------------------|
//! | `MergeStarted` | lock replicas, insert a merge group               |
//! | `SplitStarted` | spawn the twin, lock replicas, insert split group |
//! | `MergeEnded`   | destroy the consumed unit, resume the owner       |
//! | `SplitEnded`   | unlock both units, add them to the live pool      |
//! | `UnitState`    | refresh a replica's attributes                    |
//!
//! Delivery is at-least-once and unordered across peers. Every handler is
//! safe to run twice.

use amalgam_core::{PeerId, TransitionId, Unit, UnitId, Vec3};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerId;

/// Routing header carried by every request and transition broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Ledger the resulting group belongs in.
    pub ledger: LedgerId,
    /// Authority domain the request claims.
    pub authority: PeerId,
}

/// Full replicated state of one unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Authority-assigned handle.
    pub id: UnitId,
    /// Attributes.
    pub unit: Unit,
    /// World position at snapshot time.
    pub position: Vec3,
    /// Local scale at snapshot time.
    pub scale: Vec3,
}

/// Messages a peer sends to the authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CompositionRequest {
    /// Fuse `merging` into `owner`.
    Merge {
        /// Routing header.
        header: RequestHeader,
        /// Surviving unit.
        owner: UnitId,
        /// Consumed unit.
        merging: UnitId,
    },
    /// Split a rank-1 unit in two.
    Split {
        /// Routing header.
        header: RequestHeader,
        /// Unit to split.
        unit: UnitId,
    },
    /// The requester's merge animation has finished.
    EndMerge {
        /// Routing header.
        header: RequestHeader,
        /// Finished transition.
        transition: TransitionId,
        /// Surviving unit.
        owner: UnitId,
        /// Consumed unit.
        merging: UnitId,
    },
    /// The requester's split animation has finished.
    EndSplit {
        /// Routing header.
        header: RequestHeader,
        /// Finished transition.
        transition: TransitionId,
        /// Original unit.
        owner: UnitId,
        /// Spawned twin.
        split: UnitId,
    },
}

impl CompositionRequest {
    /// Header of any request.
    #[must_use]
    pub const fn header(&self) -> RequestHeader {
        match self {
            Self::Merge { header, .. }
            | Self::Split { header, .. }
            | Self::EndMerge { header, .. }
            | Self::EndSplit { header, .. } => *header,
        }
    }
}

/// Messages the authority sends to every peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CompositionBroadcast {
    /// A merge was accepted.
    MergeStarted {
        /// Routing header copied from the request.
        header: RequestHeader,
        /// Transition id.
        transition: TransitionId,
        /// Surviving unit.
        owner: UnitId,
        /// Consumed unit.
        merging: UnitId,
        /// Duration in seconds.
        duration: f32,
    },
    /// A split was accepted and the twin spawned.
    SplitStarted {
        /// Routing header copied from the request.
        header: RequestHeader,
        /// Transition id.
        transition: TransitionId,
        /// Original unit.
        owner: UnitId,
        /// The spawned twin.
        split: UnitSnapshot,
        /// Planar angle in degrees, in `[-180, 180)`.
        angle: f32,
        /// Distance each half travels.
        radius: f32,
        /// Duration in seconds.
        duration: f32,
    },
    /// A merge committed.
    MergeEnded {
        /// Routing header.
        header: RequestHeader,
        /// Transition id.
        transition: TransitionId,
        /// Surviving unit.
        owner: UnitId,
        /// Unit the commit destroyed, if it still existed.
        destroyed: Option<UnitId>,
    },
    /// A split committed.
    SplitEnded {
        /// Routing header.
        header: RequestHeader,
        /// Transition id.
        transition: TransitionId,
        /// Original unit.
        owner: UnitId,
        /// The twin.
        split: UnitId,
    },
    /// Replicated attributes of a changed unit.
    UnitState(UnitSnapshot),
}

/// A request the authority accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accepted {
    /// Id given to the new transition.
    pub transition: TransitionId,
    /// Twin spawned by a split.
    pub spawned: Option<UnitId>,
}

/// What a peer did with one broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// A group was inserted into a ledger.
    Inserted(LedgerId),
    /// End-of-transition effects were applied to the replica.
    Ended,
    /// A replica was created or refreshed.
    Replicated,
    /// Already applied; nothing changed.
    Duplicate,
    /// No ledger with the header's id exists here.
    UnknownLedger(LedgerId),
    /// The ledger exists but belongs to another authority domain.
    AuthorityMismatch {
        /// Domain of the local ledger.
        expected: PeerId,
        /// Domain claimed by the broadcast.
        got: PeerId,
    },
    /// A participant is missing from the replica.
    MissingParticipant(UnitId),
}
