//! # Sync Error Types
//!
//! Two families of failure:
//! - [`EngineError`]: the engine itself cannot proceed (bad config, missing
//!   collaborator, closed transport)
//! - [`Rejection`]: the authority refused a peer's request. Rejections are
//!   ordinary protocol outcomes and never abort a tick.

use amalgam_core::{CoreError, PeerId, TransitionId, UnitId};
use thiserror::Error;

/// Errors that stop the engine from doing its work.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A peer was built without one of its required collaborators.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The other end of a transport channel has gone away.
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    /// Engine configuration failed validation.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// Engine configuration is not valid TOML.
    #[error("failed to parse engine config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Engine configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Error from the core crate (attribute table loading).
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Reasons the authority refuses a merge or split request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A referenced unit does not exist (never did, or already destroyed).
    #[error("unit {0} does not exist")]
    UnknownUnit(UnitId),

    /// A merge named the same unit twice.
    #[error("unit {0} cannot merge with itself")]
    SelfMerge(UnitId),

    /// The requester does not own the unit.
    #[error("unit {unit} belongs to {owner}, not {requester}")]
    NotOwner {
        /// The unit in question.
        unit: UnitId,
        /// Its actual owner.
        owner: PeerId,
        /// Who asked.
        requester: PeerId,
    },

    /// The request header claims an authority domain the sender does not hold.
    #[error("header claims authority {claimed} but was sent by {sender}")]
    AuthorityMismatch {
        /// Authority named in the header.
        claimed: PeerId,
        /// Peer that actually sent the request.
        sender: PeerId,
    },

    /// A unit is already part of an in-flight transition.
    #[error("unit {unit} is locked by transition {transition}")]
    Locked {
        /// The locked unit.
        unit: UnitId,
        /// The transition holding it.
        transition: TransitionId,
    },

    /// The two units of a merge have different ranks.
    #[error("rank mismatch: owner has rank {owner_rank}, merging unit has rank {merging_rank}")]
    RankMismatch {
        /// Rank of the surviving unit.
        owner_rank: u32,
        /// Rank of the unit to be destroyed.
        merging_rank: u32,
    },

    /// Only rank-1 units may split.
    #[error("unit {unit} has rank {rank}; only rank 1 can split")]
    NotSplittable {
        /// The unit in question.
        unit: UnitId,
        /// Its rank.
        rank: u32,
    },

    /// The owner already has as many units as the table allows.
    #[error("unit capacity reached: {live}/{capacity}")]
    CapacityReached {
        /// Units the owner currently has.
        live: usize,
        /// Configured per-player capacity.
        capacity: usize,
    },

    /// The attribute table has no row for the rank involved.
    #[error("attribute table has no row for rank {0}")]
    MissingRow(u32),

    /// An end request named a transition the authority never started.
    #[error("transition {0} is unknown")]
    UnknownTransition(TransitionId),
}
